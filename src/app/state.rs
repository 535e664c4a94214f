use anyhow::Result;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::browse::{self, Browsable, SortKey};
use crate::duration::format_duration;
use crate::richtext::excerpt;
use crate::storage::{
    state_label, PersonRecord, PolicyRecord, StorageHandle, TaskRecord, VendorRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    List,
    Reader,
}

/// The registers the console can page through. Frameworks and controls
/// get their own overview rendering on the CLI side; the interactive
/// list view covers the flat, filterable registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Policies,
    Tasks,
    Vendors,
    People,
}

impl Register {
    pub fn title(self) -> &'static str {
        match self {
            Register::Policies => "Policies",
            Register::Tasks => "Tasks",
            Register::Vendors => "Vendors",
            Register::People => "People",
        }
    }

    /// Status filter cycle for this register; the leading entry is the
    /// match-everything sentinel.
    pub fn status_filters(self) -> &'static [&'static str] {
        match self {
            Register::Policies => &[browse::STATUS_ALL, "ACTIVE", "DRAFT"],
            Register::Tasks => &[browse::STATUS_ALL, "TODO", "DONE"],
            Register::Vendors | Register::People => &[browse::STATUS_ALL],
        }
    }
}

/// One row of whatever register is active, flattened to the fields the
/// list pane and the browse engine need.
#[derive(Debug, Clone)]
pub struct RowSummary {
    pub id: i64,
    pub title: String,
    pub status: String,
    pub meta: String,
    pub preview: String,
    pub detail: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Browsable for RowSummary {
    fn name(&self) -> &str {
        &self.title
    }
    fn status(&self) -> &str {
        &self.status
    }
    fn created_at(&self) -> &str {
        &self.created_at
    }
    fn updated_at(&self) -> &str {
        &self.updated_at
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub active: bool,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmDeleteOverlay {
    pub policy_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AssignOverlay {
    pub task_id: i64,
    pub task_name: String,
    pub people: Vec<PersonRecord>,
    pub search: String,
    pub selected: usize,
}

impl AssignOverlay {
    pub fn visible_people(&self) -> Vec<&PersonRecord> {
        browse::filter_people(&self.people, &self.search)
    }

    pub fn selected_person(&self) -> Option<&PersonRecord> {
        self.visible_people().get(self.selected).copied()
    }

    pub fn move_selection(&mut self, delta: isize) {
        let visible = self.visible_people().len();
        if visible == 0 {
            self.selected = 0;
            return;
        }
        let len = visible as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1);
        self.selected = next as usize;
    }

    pub fn push_char(&mut self, ch: char) {
        self.search.push(ch);
        self.clamp_selection();
    }

    pub fn pop_char(&mut self) {
        self.search.pop();
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        let visible = self.visible_people().len();
        if visible == 0 {
            self.selected = 0;
        } else if self.selected >= visible {
            self.selected = visible - 1;
        }
    }
}

#[derive(Debug, Clone)]
pub enum OverlayState {
    ConfirmDelete(ConfirmDeleteOverlay),
    AssignPerson(AssignOverlay),
}

pub struct AppState {
    pub focus: FocusPane,
    pub register: Register,
    pub selected: usize,
    pub page_size: usize,
    pub preview_lines: usize,
    pub sort: SortKey,
    pub status_filter: String,
    pub search: SearchState,
    pub status_message: Option<String>,
    pub overlay: Option<OverlayState>,
    all_rows: Vec<RowSummary>,
    rows: Vec<RowSummary>,
}

impl AppState {
    pub fn load(
        storage: &StorageHandle,
        page_size: usize,
        preview_lines: usize,
        sort: SortKey,
    ) -> Result<Self> {
        let mut state = Self {
            focus: FocusPane::List,
            register: Register::Policies,
            selected: 0,
            page_size,
            preview_lines,
            sort,
            status_filter: browse::STATUS_ALL.to_string(),
            search: SearchState::default(),
            status_message: None,
            overlay: None,
            all_rows: Vec::new(),
            rows: Vec::new(),
        };
        state.refresh(storage)?;
        Ok(state)
    }

    pub fn rows(&self) -> &[RowSummary] {
        &self.rows
    }

    pub fn total_rows(&self) -> usize {
        self.all_rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn selected(&self) -> Option<&RowSummary> {
        self.rows.get(self.selected)
    }

    pub fn selected_id(&self) -> Option<i64> {
        self.selected().map(|row| row.id)
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let len = self.rows.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1);
        self.selected = next as usize;
    }

    pub fn select_row_by_id(&mut self, id: i64) {
        if let Some(idx) = self.rows.iter().position(|row| row.id == id) {
            self.selected = idx;
        } else {
            self.normalize_selection();
        }
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            FocusPane::List => FocusPane::Reader,
            FocusPane::Reader => FocusPane::List,
        };
    }

    pub fn set_register(&mut self, register: Register, storage: &StorageHandle) -> Result<()> {
        if self.register == register {
            return Ok(());
        }
        self.register = register;
        self.status_filter = browse::STATUS_ALL.to_string();
        self.search = SearchState::default();
        self.selected = 0;
        self.refresh(storage)
    }

    pub fn refresh(&mut self, storage: &StorageHandle) -> Result<()> {
        let keep = self.selected_id();
        self.all_rows = match self.register {
            Register::Policies => storage
                .list_policies()?
                .into_iter()
                .take(self.page_size)
                .map(summarize_policy)
                .collect(),
            Register::Tasks => storage
                .list_tasks(None)?
                .into_iter()
                .take(self.page_size)
                .map(summarize_task)
                .collect(),
            Register::Vendors => storage
                .list_vendors()?
                .into_iter()
                .take(self.page_size)
                .map(summarize_vendor)
                .collect(),
            Register::People => storage
                .list_people()?
                .into_iter()
                .take(self.page_size)
                .map(summarize_person)
                .collect(),
        };
        self.apply_view();
        if let Some(id) = keep {
            self.select_row_by_id(id);
        }
        Ok(())
    }

    /// Re-derives the visible rows from the cached register contents.
    /// Pure list work; storage is only touched by `refresh`.
    pub fn apply_view(&mut self) {
        self.rows = browse::browse(
            &self.all_rows,
            &self.search.query,
            &self.status_filter,
            Some(self.sort),
        )
        .into_iter()
        .cloned()
        .collect();
        self.normalize_selection();
    }

    pub fn begin_search(&mut self) {
        self.search.active = true;
        self.focus = FocusPane::List;
    }

    pub fn finish_search(&mut self) {
        self.search.active = false;
    }

    pub fn cancel_search(&mut self) {
        self.search.active = false;
        self.search.query.clear();
        self.apply_view();
    }

    pub fn push_search_char(&mut self, ch: char) {
        self.search.query.push(ch);
        self.selected = 0;
        self.apply_view();
    }

    pub fn pop_search_char(&mut self) {
        if self.search.query.pop().is_some() {
            self.selected = 0;
            self.apply_view();
        }
    }

    pub fn cycle_status_filter(&mut self) -> &str {
        let options = self.register.status_filters();
        let current = options
            .iter()
            .position(|option| *option == self.status_filter)
            .unwrap_or(0);
        self.status_filter = options[(current + 1) % options.len()].to_string();
        self.selected = 0;
        self.apply_view();
        &self.status_filter
    }

    pub fn cycle_sort(&mut self) -> SortKey {
        self.sort = self.sort.next();
        self.apply_view();
        self.sort
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn open_confirm_delete(&mut self) {
        let Some(row) = self.selected() else {
            return;
        };
        self.overlay = Some(OverlayState::ConfirmDelete(ConfirmDeleteOverlay {
            policy_id: row.id,
            name: row.title.clone(),
        }));
    }

    pub fn open_assign_overlay(&mut self, storage: &StorageHandle) -> Result<()> {
        let Some(row) = self.selected() else {
            return Ok(());
        };
        let people = storage.list_people()?;
        self.overlay = Some(OverlayState::AssignPerson(AssignOverlay {
            task_id: row.id,
            task_name: row.title.clone(),
            people,
            search: String::new(),
            selected: 0,
        }));
        Ok(())
    }

    pub fn confirm_delete_overlay(&self) -> Option<&ConfirmDeleteOverlay> {
        match self.overlay.as_ref() {
            Some(OverlayState::ConfirmDelete(overlay)) => Some(overlay),
            _ => None,
        }
    }

    pub fn assign_overlay(&self) -> Option<&AssignOverlay> {
        match self.overlay.as_ref() {
            Some(OverlayState::AssignPerson(overlay)) => Some(overlay),
            _ => None,
        }
    }

    pub fn assign_overlay_mut(&mut self) -> Option<&mut AssignOverlay> {
        match self.overlay.as_mut() {
            Some(OverlayState::AssignPerson(overlay)) => Some(overlay),
            _ => None,
        }
    }

    fn normalize_selection(&mut self) {
        if self.rows.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.rows.len() {
            self.selected = self.rows.len() - 1;
        }
    }
}

pub fn summarize_policy(record: PolicyRecord) -> RowSummary {
    let preview = if record.content.trim().is_empty() {
        "No description available".to_string()
    } else {
        excerpt(&record.content).replace('\n', " ")
    };
    RowSummary {
        id: record.id,
        title: record.name,
        status: record.status.as_ref().to_string(),
        meta: format!(
            "{} • updated {}",
            state_label(record.status.as_ref()),
            format_relative(&record.updated_at)
        ),
        preview,
        detail: record.content,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

pub fn summarize_task(record: TaskRecord) -> RowSummary {
    RowSummary {
        id: record.id,
        title: record.name.clone(),
        status: record.state.as_ref().to_string(),
        meta: task_meta(&record),
        preview: record.description.replace('\n', " "),
        detail: task_detail(&record),
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

pub fn summarize_vendor(record: VendorRecord) -> RowSummary {
    RowSummary {
        id: record.id,
        title: record.name,
        status: String::new(),
        meta: format!("added {}", format_relative(&record.created_at)),
        preview: String::new(),
        detail: String::new(),
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

pub fn summarize_person(record: PersonRecord) -> RowSummary {
    let mut detail = format!("Primary email: {}", record.primary_email);
    if !record.additional_emails.is_empty() {
        detail.push_str(&format!(
            "\nAlso reachable: {}",
            record.additional_emails.join(", ")
        ));
    }
    RowSummary {
        id: record.id,
        title: record.full_name,
        status: String::new(),
        meta: record.primary_email.clone(),
        preview: record.primary_email,
        detail,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

fn task_meta(record: &TaskRecord) -> String {
    let mut parts = vec![state_label(record.state.as_ref())];
    if let Some(estimate) = record.time_estimate.as_deref() {
        parts.push(format!("est. {}", format_duration(estimate)));
    }
    if let Some(assignee) = record.assignee_name.as_deref() {
        parts.push(assignee.to_string());
    }
    match record.evidence_count {
        0 => {}
        1 => parts.push("1 evidence file".to_string()),
        n => parts.push(format!("{n} evidence files")),
    }
    parts.join(" • ")
}

fn task_detail(record: &TaskRecord) -> String {
    let mut detail = format!("Control: {}\n", record.control_name);
    detail.push_str(&format!("State: {}\n", state_label(record.state.as_ref())));
    if let Some(estimate) = record.time_estimate.as_deref() {
        detail.push_str(&format!("Estimate: {}\n", format_duration(estimate)));
    }
    match record.assignee_name.as_deref() {
        Some(assignee) => detail.push_str(&format!("Assigned to: {assignee}\n")),
        None => detail.push_str("Unassigned\n"),
    }
    if !record.description.trim().is_empty() {
        detail.push('\n');
        detail.push_str(&record.description);
    }
    detail
}

/// `3m ago` / `5h ago` / `12d ago`, falling back to the raw timestamp for
/// anything older than ten days or unparseable.
pub fn format_relative(timestamp: &str) -> String {
    let Ok(then) = OffsetDateTime::parse(timestamp, &Rfc3339) else {
        return timestamp.to_string();
    };
    let diff = OffsetDateTime::now_utc() - then;
    if diff.is_negative() || diff < Duration::seconds(45) {
        return "just now".to_string();
    }
    if diff < Duration::minutes(90) {
        let mins = diff.whole_minutes().max(1);
        return format!("{mins}m ago");
    }
    if diff < Duration::hours(36) {
        let hours = diff.whole_hours().max(1);
        return format!("{hours}h ago");
    }
    if diff < Duration::days(10) {
        let days = diff.whole_days().max(1);
        return format!("{days}d ago");
    }
    timestamp.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TaskState;

    fn row(id: i64, title: &str, status: &str, updated_at: &str) -> RowSummary {
        RowSummary {
            id,
            title: title.to_string(),
            status: status.to_string(),
            meta: String::new(),
            preview: String::new(),
            detail: String::new(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: updated_at.to_string(),
        }
    }

    fn state_with_rows(rows: Vec<RowSummary>) -> AppState {
        let mut state = AppState {
            focus: FocusPane::List,
            register: Register::Policies,
            selected: 0,
            page_size: 50,
            preview_lines: 2,
            sort: SortKey::NameAsc,
            status_filter: browse::STATUS_ALL.to_string(),
            search: SearchState::default(),
            status_message: None,
            overlay: None,
            all_rows: rows,
            rows: Vec::new(),
        };
        state.apply_view();
        state
    }

    #[test]
    fn search_narrows_without_touching_the_register_cache() {
        let mut state = state_with_rows(vec![
            row(1, "Access Policy", "ACTIVE", "2025-06-01T00:00:00Z"),
            row(2, "Retention Policy", "DRAFT", "2025-06-02T00:00:00Z"),
        ]);
        state.push_search_char('r');
        state.push_search_char('e');
        state.push_search_char('t');
        assert_eq!(state.len(), 1);
        assert_eq!(state.selected().map(|r| r.id), Some(2));
        assert_eq!(state.total_rows(), 2);

        state.cancel_search();
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn status_filter_cycles_through_register_options() {
        let mut state = state_with_rows(vec![
            row(1, "Access Policy", "ACTIVE", "2025-06-01T00:00:00Z"),
            row(2, "Retention Policy", "DRAFT", "2025-06-02T00:00:00Z"),
        ]);
        assert_eq!(state.cycle_status_filter(), "ACTIVE");
        assert_eq!(state.len(), 1);
        assert_eq!(state.cycle_status_filter(), "DRAFT");
        assert_eq!(state.selected().map(|r| r.id), Some(2));
        assert_eq!(state.cycle_status_filter(), browse::STATUS_ALL);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn sort_cycling_reorders_the_view() {
        let mut state = state_with_rows(vec![
            row(1, "Bravo", "ACTIVE", "2025-06-02T00:00:00Z"),
            row(2, "Alpha", "ACTIVE", "2025-06-01T00:00:00Z"),
        ]);
        assert_eq!(state.rows()[0].title, "Alpha");
        // NameAsc -> NameDesc
        state.cycle_sort();
        assert_eq!(state.rows()[0].title, "Bravo");
        // NameDesc -> UpdatedDesc
        state.cycle_sort();
        assert_eq!(state.rows()[0].id, 1);
    }

    #[test]
    fn selection_clamps_at_register_edges() {
        let mut state = state_with_rows(vec![
            row(1, "A", "ACTIVE", "2025-06-01T00:00:00Z"),
            row(2, "B", "ACTIVE", "2025-06-01T00:00:00Z"),
        ]);
        state.move_selection(-3);
        assert_eq!(state.selected, 0);
        state.move_selection(10);
        assert_eq!(state.selected, 1);
    }

    #[test]
    fn assign_overlay_search_filters_and_clamps() {
        let people = vec![
            PersonRecord {
                id: 1,
                full_name: "Ada Lovelace".into(),
                primary_email: "ada@example.com".into(),
                additional_emails: Vec::new(),
                created_at: "2025-01-01T00:00:00Z".into(),
                updated_at: "2025-01-01T00:00:00Z".into(),
            },
            PersonRecord {
                id: 2,
                full_name: "Grace Hopper".into(),
                primary_email: "grace@navy.mil".into(),
                additional_emails: Vec::new(),
                created_at: "2025-01-01T00:00:00Z".into(),
                updated_at: "2025-01-01T00:00:00Z".into(),
            },
        ];
        let mut overlay = AssignOverlay {
            task_id: 7,
            task_name: "Review access".into(),
            people,
            search: String::new(),
            selected: 1,
        };
        assert_eq!(overlay.visible_people().len(), 2);
        for ch in "grace".chars() {
            overlay.push_char(ch);
        }
        assert_eq!(overlay.visible_people().len(), 1);
        assert_eq!(overlay.selected_person().map(|p| p.id), Some(2));

        overlay.push_char('z');
        assert!(overlay.selected_person().is_none());
        overlay.pop_char();
        assert_eq!(overlay.selected_person().map(|p| p.id), Some(2));
    }

    #[test]
    fn task_meta_lists_estimate_assignee_and_evidence() {
        let record = TaskRecord {
            id: 1,
            control_id: 2,
            control_name: "Asset inventory".into(),
            name: "Collect asset list".into(),
            description: String::new(),
            time_estimate: Some("P2DT4H".into()),
            state: TaskState::Todo,
            version: 1,
            assigned_to: Some(3),
            assignee_name: Some("Ada Lovelace".into()),
            evidence_count: 2,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        };
        assert_eq!(
            task_meta(&record),
            "Todo • est. 2 days, 4 hours • Ada Lovelace • 2 evidence files"
        );
    }

    #[test]
    fn policy_summary_uses_the_excerpt_and_flags_empty_content() {
        let record = PolicyRecord {
            id: 1,
            name: "Security Policy".into(),
            content: "# Title\n<p>Hello &amp; welcome</p>".into(),
            status: crate::storage::PolicyStatus::Active,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        };
        let summary = summarize_policy(record);
        assert_eq!(summary.preview, "Hello & welcome");
        assert_eq!(summary.status, "ACTIVE");

        let empty = PolicyRecord {
            id: 2,
            name: "Empty".into(),
            content: "  ".into(),
            status: crate::storage::PolicyStatus::Draft,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        };
        assert_eq!(summarize_policy(empty).preview, "No description available");
    }

    #[test]
    fn relative_labels_fall_back_to_the_raw_timestamp() {
        assert_eq!(format_relative("not-a-date"), "not-a-date");
        assert_eq!(format_relative("2001-01-01T00:00:00Z"), "2001-01-01T00:00:00Z");
        let recent = (OffsetDateTime::now_utc() - Duration::minutes(5))
            .format(&Rfc3339)
            .expect("formattable");
        assert_eq!(format_relative(&recent), "5m ago");
    }
}
