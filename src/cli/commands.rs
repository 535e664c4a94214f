use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use indexmap::IndexMap;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::app::App;
use crate::browse::{self, filter_people, SortKey};
use crate::config::AppConfig;
use crate::duration::{build_duration, format_duration};
use crate::files::{format_file_size, FileKind};
use crate::richtext::excerpt;
use crate::storage::{
    state_label, ControlRecord, ControlState, EvidenceRecord, EvidenceState, FrameworkRecord,
    Importance, PolicyRecord, PolicyStatus, RecordKind, StorageError, StorageHandle, TaskRecord,
    TaskState,
};

#[derive(Args, Debug, Clone)]
pub struct FrameworkArgs {
    #[command(subcommand)]
    pub command: FrameworkCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FrameworkCommand {
    /// List all frameworks
    List,
    /// Create a new framework
    Add(FrameworkAddArgs),
    /// Show a framework's controls grouped by category
    Overview(FrameworkOverviewArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FrameworkAddArgs {
    /// Framework name
    pub name: String,
    /// Short description
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Args, Debug, Clone)]
pub struct FrameworkOverviewArgs {
    /// Framework identifier
    pub framework_id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct ControlArgs {
    #[command(subcommand)]
    pub command: ControlCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ControlCommand {
    /// Create a control inside a framework
    Add(ControlAddArgs),
    /// List a framework's controls
    List(ControlListArgs),
    /// Move a control to a new state
    SetState(ControlSetStateArgs),
    /// Print a control's state transition history
    History(ControlHistoryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ControlAddArgs {
    /// Framework identifier
    pub framework_id: i64,
    /// Control name
    pub name: String,
    /// Short description
    #[arg(long, default_value = "")]
    pub description: String,
    /// Grouping category shown on the framework overview
    #[arg(long, default_value = "")]
    pub category: String,
    /// MANDATORY, PREFERRED or ADVANCED
    #[arg(long, default_value = "PREFERRED")]
    pub importance: String,
}

#[derive(Args, Debug, Clone)]
pub struct ControlListArgs {
    /// Framework identifier
    pub framework_id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct ControlSetStateArgs {
    /// Control identifier
    pub control_id: i64,
    /// NOT_STARTED, IN_PROGRESS, NOT_APPLICABLE or IMPLEMENTED
    pub state: String,
    /// Why the state changed (recorded in the transition log)
    #[arg(long)]
    pub reason: Option<String>,
    /// Fail instead of overwriting when the stored version differs
    #[arg(long)]
    pub expect_version: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct ControlHistoryArgs {
    /// Control identifier
    pub control_id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommand {
    /// Create a task under a control
    Add(TaskAddArgs),
    /// List tasks, optionally narrowed to one control
    List(TaskListArgs),
    /// Show one task with its evidence
    Show(TaskShowArgs),
    /// Mark a task done
    Done(TaskStateArgs),
    /// Reopen a completed task
    Reopen(TaskStateArgs),
    /// Assign a task to a person
    Assign(TaskAssignArgs),
    /// Remove a task's assignee
    Unassign(TaskShowArgs),
    /// Print a task's state transition history
    History(TaskShowArgs),
    /// Delete a task and its attached evidence
    Remove(TaskShowArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TaskAddArgs {
    /// Control identifier
    pub control_id: i64,
    /// Task name
    pub name: String,
    /// Longer description
    #[arg(long, default_value = "")]
    pub description: String,
    /// Estimated days of effort
    #[arg(long, default_value = "")]
    pub days: String,
    /// Estimated hours of effort
    #[arg(long, default_value = "")]
    pub hours: String,
    /// Estimated minutes of effort
    #[arg(long, default_value = "")]
    pub minutes: String,
}

#[derive(Args, Debug, Clone)]
pub struct TaskListArgs {
    /// Narrow to one control
    #[arg(long)]
    pub control: Option<i64>,
    /// Case-insensitive name filter
    #[arg(long, default_value = "")]
    pub query: String,
    /// ALL, TODO or DONE
    #[arg(long, default_value = browse::STATUS_ALL)]
    pub status: String,
    /// name-asc, name-desc, updated-desc, updated-asc, created-desc, created-asc
    #[arg(long)]
    pub sort: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TaskShowArgs {
    /// Task identifier
    pub task_id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct TaskStateArgs {
    /// Task identifier
    pub task_id: i64,
    /// Fail instead of overwriting when the stored version differs
    #[arg(long)]
    pub expect_version: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct TaskAssignArgs {
    /// Task identifier
    pub task_id: i64,
    /// Person identifier to assign
    #[arg(long, conflicts_with = "search")]
    pub person: Option<i64>,
    /// Find the assignee by name or email instead
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub command: PolicyCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PolicyCommand {
    /// Create a policy (content inline or from stdin)
    Add(PolicyAddArgs),
    /// List policies with search, status filter and sorting
    List(PolicyListArgs),
    /// Print one policy in full
    Show(PolicyShowArgs),
    /// Change a policy's status
    SetStatus(PolicySetStatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PolicyAddArgs {
    /// Policy name
    pub name: String,
    /// Policy content; read from stdin when omitted
    #[arg(long)]
    pub content: Option<String>,
    /// Create as ACTIVE instead of DRAFT
    #[arg(long)]
    pub activate: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PolicyListArgs {
    /// Case-insensitive name filter
    #[arg(long, default_value = "")]
    pub query: String,
    /// ALL, ACTIVE or DRAFT
    #[arg(long, default_value = browse::STATUS_ALL)]
    pub status: String,
    /// name-asc, name-desc, updated-desc, updated-asc, created-desc, created-asc
    #[arg(long)]
    pub sort: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PolicyShowArgs {
    /// Policy identifier
    pub policy_id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct PolicySetStatusArgs {
    /// Policy identifier
    pub policy_id: i64,
    /// ACTIVE or DRAFT
    pub status: String,
}

#[derive(Args, Debug, Clone)]
pub struct VendorArgs {
    #[command(subcommand)]
    pub command: VendorCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum VendorCommand {
    /// Record a third-party vendor
    Add(VendorAddArgs),
    /// List vendors
    List(VendorListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct VendorAddArgs {
    /// Vendor name
    pub name: String,
}

#[derive(Args, Debug, Clone)]
pub struct VendorListArgs {
    /// Case-insensitive name filter
    #[arg(long, default_value = "")]
    pub query: String,
}

#[derive(Args, Debug, Clone)]
pub struct PeopleArgs {
    #[command(subcommand)]
    pub command: PeopleCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PeopleCommand {
    /// Add an organization member
    Add(PeopleAddArgs),
    /// List members, optionally searched by name or email
    List(PeopleListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PeopleAddArgs {
    /// Full name
    pub full_name: String,
    /// Primary email address
    pub email: String,
    /// Additional email addresses
    #[arg(long = "also")]
    pub additional: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PeopleListArgs {
    /// Case-insensitive name or email search
    #[arg(long, default_value = "")]
    pub search: String,
}

#[derive(Args, Debug, Clone)]
pub struct EvidenceArgs {
    #[command(subcommand)]
    pub command: EvidenceCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum EvidenceCommand {
    /// Copy a file into the evidence vault and attach it to a task
    Attach(EvidenceAttachArgs),
    /// List a task's evidence files
    List(EvidenceListArgs),
    /// Change an evidence file's state
    SetState(EvidenceSetStateArgs),
    /// Detach an evidence file and remove its vault copy
    Remove(EvidenceRemoveArgs),
}

#[derive(Args, Debug, Clone)]
pub struct EvidenceAttachArgs {
    /// Task identifier
    pub task_id: i64,
    /// File to attach
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct EvidenceListArgs {
    /// Task identifier
    pub task_id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct EvidenceSetStateArgs {
    /// Evidence identifier
    pub evidence_id: i64,
    /// VALID, INVALID or EXPIRED
    pub state: String,
    /// Why the state changed (recorded in the transition log)
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EvidenceRemoveArgs {
    /// Evidence identifier
    pub evidence_id: i64,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

pub fn handle_framework(storage: &StorageHandle, args: FrameworkArgs) -> Result<()> {
    match args.command {
        FrameworkCommand::List => {
            let frameworks = storage.list_frameworks()?;
            if frameworks.is_empty() {
                println!("No frameworks yet.");
                return Ok(());
            }
            for framework in frameworks {
                println!("#{}  {}", framework.id, framework.name);
                if !framework.description.is_empty() {
                    println!("    {}", framework.description);
                }
            }
            Ok(())
        }
        FrameworkCommand::Add(args) => {
            let id = storage.create_framework(&args.name, &args.description)?;
            println!("Created framework #{id} '{}'", args.name.trim());
            Ok(())
        }
        FrameworkCommand::Overview(args) => {
            let framework = storage
                .fetch_framework(args.framework_id)?
                .ok_or_else(|| anyhow!("framework #{} not found", args.framework_id))?;
            let controls = storage.list_controls(framework.id)?;
            print!("{}", render_framework_overview(&framework, &controls));
            Ok(())
        }
    }
}

pub fn handle_control(storage: &StorageHandle, args: ControlArgs) -> Result<()> {
    match args.command {
        ControlCommand::Add(args) => {
            let importance = parse_state::<Importance>(
                &args.importance,
                "MANDATORY, PREFERRED or ADVANCED",
            )?;
            let id = storage.create_control(
                args.framework_id,
                &args.name,
                &args.description,
                &args.category,
                importance,
            )?;
            println!("Created control #{id} '{}'", args.name.trim());
            Ok(())
        }
        ControlCommand::List(args) => {
            let controls = storage.list_controls(args.framework_id)?;
            if controls.is_empty() {
                println!("No controls in framework #{}.", args.framework_id);
                return Ok(());
            }
            for control in controls {
                println!(
                    "#{}  {}  [{}]{}",
                    control.id,
                    control.name,
                    state_label(control.state.as_ref()),
                    if control.category.is_empty() {
                        String::new()
                    } else {
                        format!("  ({})", control.category)
                    }
                );
            }
            Ok(())
        }
        ControlCommand::SetState(args) => {
            let state = parse_state::<ControlState>(
                &args.state,
                "NOT_STARTED, IN_PROGRESS, NOT_APPLICABLE or IMPLEMENTED",
            )?;
            let previous = apply_versioned(storage.set_control_state(
                args.control_id,
                state,
                args.reason.as_deref(),
                args.expect_version,
            ))?;
            println!(
                "Control #{} moved {} -> {}",
                args.control_id,
                state_label(previous.as_ref()),
                state_label(state.as_ref())
            );
            Ok(())
        }
        ControlCommand::History(args) => {
            print_history(storage, RecordKind::Control, args.control_id)
        }
    }
}

pub fn handle_task(storage: &StorageHandle, args: TaskArgs) -> Result<()> {
    match args.command {
        TaskCommand::Add(args) => {
            let estimate = build_duration(&args.days, &args.hours, &args.minutes);
            let estimate = if estimate.is_empty() {
                None
            } else {
                Some(estimate)
            };
            let id = storage.create_task(
                args.control_id,
                &args.name,
                &args.description,
                estimate.as_deref(),
            )?;
            match estimate {
                Some(iso) => println!(
                    "Created task #{id} '{}' (estimate: {})",
                    args.name.trim(),
                    format_duration(&iso)
                ),
                None => println!("Created task #{id} '{}'", args.name.trim()),
            }
            Ok(())
        }
        TaskCommand::List(args) => {
            let tasks = storage.list_tasks(args.control)?;
            let sort = args.sort.as_deref().and_then(SortKey::parse);
            print!(
                "{}",
                render_task_list(&tasks, &args.query, &args.status, sort)
            );
            Ok(())
        }
        TaskCommand::Show(args) => {
            let task = storage
                .fetch_task(args.task_id)?
                .ok_or_else(|| anyhow!("task #{} not found", args.task_id))?;
            let evidence = storage.list_evidence(task.id)?;
            print!("{}", render_task_detail(&task, &evidence));
            Ok(())
        }
        TaskCommand::Done(args) => {
            set_task_state(storage, args.task_id, TaskState::Done, args.expect_version)
        }
        TaskCommand::Reopen(args) => {
            set_task_state(storage, args.task_id, TaskState::Todo, args.expect_version)
        }
        TaskCommand::Assign(args) => task_assign(storage, args),
        TaskCommand::Unassign(args) => {
            storage.unassign_task(args.task_id)?;
            println!("Task #{} unassigned", args.task_id);
            Ok(())
        }
        TaskCommand::History(args) => print_history(storage, RecordKind::Task, args.task_id),
        TaskCommand::Remove(args) => {
            // Drop vault copies first; the row delete cascades over the
            // evidence records themselves.
            for evidence in storage.list_evidence(args.task_id)? {
                storage.remove_evidence(evidence.id)?;
            }
            storage.delete_task(args.task_id)?;
            println!("Deleted task #{}", args.task_id);
            Ok(())
        }
    }
}

fn set_task_state(
    storage: &StorageHandle,
    task_id: i64,
    state: TaskState,
    expect_version: Option<i64>,
) -> Result<()> {
    let previous = apply_versioned(storage.set_task_state(task_id, state, expect_version))?;
    if previous == state {
        println!("Task #{task_id} already {}", state_label(state.as_ref()));
    } else {
        println!("Task #{task_id} marked {}", state_label(state.as_ref()));
    }
    Ok(())
}

fn task_assign(storage: &StorageHandle, args: TaskAssignArgs) -> Result<()> {
    if let Some(person_id) = args.person {
        let person = storage
            .fetch_person(person_id)?
            .ok_or_else(|| anyhow!("person #{person_id} not found"))?;
        storage.assign_task(args.task_id, person.id)?;
        println!("Task #{} assigned to {}", args.task_id, person.full_name);
        return Ok(());
    }

    let term = args.search.unwrap_or_default();
    let term = term.trim();
    if term.is_empty() {
        bail!("provide --person <id> or --search <name-or-email>");
    }

    let people = storage.list_people()?;
    let matches = filter_people(&people, term);
    match matches.as_slice() {
        [] => bail!("no person matches '{term}'"),
        [person] => {
            storage.assign_task(args.task_id, person.id)?;
            println!("Task #{} assigned to {}", args.task_id, person.full_name);
            Ok(())
        }
        candidates => {
            println!("'{term}' matches {} people:", candidates.len());
            for person in candidates {
                println!("  #{}  {}  <{}>", person.id, person.full_name, person.primary_email);
            }
            bail!("narrow the search or pass --person <id>");
        }
    }
}

pub fn handle_policy(
    config: Arc<AppConfig>,
    storage: &StorageHandle,
    args: PolicyArgs,
) -> Result<()> {
    match args.command {
        PolicyCommand::Add(args) => {
            let content = match args.content {
                Some(content) => content,
                None => read_stdin()?
                    .ok_or_else(|| anyhow!("no --content given and stdin is a terminal"))?,
            };
            let status = if args.activate {
                PolicyStatus::Active
            } else {
                PolicyStatus::Draft
            };
            let id = storage.create_policy(&args.name, &content, status)?;
            println!(
                "Created policy #{id} '{}' [{}]",
                args.name.trim(),
                state_label(status.as_ref())
            );
            Ok(())
        }
        PolicyCommand::List(args) => {
            let policies = storage.list_policies()?;
            // An explicit but unrecognized --sort means "leave the order
            // alone"; only a missing flag falls back to the config default.
            let sort = match args.sort.as_deref() {
                Some(raw) => SortKey::parse(raw),
                None => Some(config.default_sort.sort_key()),
            };
            print!(
                "{}",
                render_policy_list(&policies, &args.query, &args.status, sort)
            );
            Ok(())
        }
        PolicyCommand::Show(args) => {
            let policy = storage
                .fetch_policy(args.policy_id)?
                .ok_or_else(|| anyhow!("policy #{} not found", args.policy_id))?;
            println!(
                "#{}  {}  [{}]",
                policy.id,
                policy.name,
                state_label(policy.status.as_ref())
            );
            println!(
                "Created {}  •  Updated {}",
                format_day(&policy.created_at),
                format_day(&policy.updated_at)
            );
            println!();
            println!("{}", policy.content);
            Ok(())
        }
        PolicyCommand::SetStatus(args) => {
            let status = parse_state::<PolicyStatus>(&args.status, "ACTIVE or DRAFT")?;
            storage.set_policy_status(args.policy_id, status)?;
            println!(
                "Policy #{} is now {}",
                args.policy_id,
                state_label(status.as_ref())
            );
            Ok(())
        }
    }
}

pub fn handle_vendor(storage: &StorageHandle, args: VendorArgs) -> Result<()> {
    match args.command {
        VendorCommand::Add(args) => {
            let id = storage.create_vendor(&args.name)?;
            println!("Recorded vendor #{id} '{}'", args.name.trim());
            Ok(())
        }
        VendorCommand::List(args) => {
            let vendors = storage.list_vendors()?;
            let needle = args.query.to_lowercase();
            let mut shown = 0usize;
            for vendor in &vendors {
                if !needle.is_empty() && !vendor.name.to_lowercase().contains(&needle) {
                    continue;
                }
                println!(
                    "#{}  {}  (added {})",
                    vendor.id,
                    vendor.name,
                    format_day(&vendor.created_at)
                );
                shown += 1;
            }
            if shown == 0 {
                println!("No vendors found.");
            }
            Ok(())
        }
    }
}

pub fn handle_people(storage: &StorageHandle, args: PeopleArgs) -> Result<()> {
    match args.command {
        PeopleCommand::Add(args) => {
            let id = storage.add_person(&args.full_name, &args.email, &args.additional)?;
            println!("Added #{id} {} <{}>", args.full_name.trim(), args.email.trim());
            Ok(())
        }
        PeopleCommand::List(args) => {
            let people = storage.list_people()?;
            let matches = filter_people(&people, args.search.trim());
            if matches.is_empty() {
                println!("No people found.");
                return Ok(());
            }
            for person in matches {
                let mut line = format!("#{}  {}  <{}>", person.id, person.full_name, person.primary_email);
                if !person.additional_emails.is_empty() {
                    let _ = write!(line, "  (+{})", person.additional_emails.join(", "));
                }
                println!("{line}");
            }
            Ok(())
        }
    }
}

pub fn handle_evidence(storage: &StorageHandle, args: EvidenceArgs) -> Result<()> {
    match args.command {
        EvidenceCommand::Attach(args) => {
            let evidence = storage
                .attach_evidence(args.task_id, &args.path)
                .with_context(|| format!("attaching {}", args.path.display()))?;
            println!(
                "Attached '{}' ({}, {}) to task #{}",
                evidence.filename,
                evidence.mime_type,
                format_file_size(evidence.size),
                args.task_id
            );
            Ok(())
        }
        EvidenceCommand::List(args) => {
            let evidence = storage.list_evidence(args.task_id)?;
            print!("{}", render_evidence_list(&evidence));
            Ok(())
        }
        EvidenceCommand::SetState(args) => {
            let state =
                parse_state::<EvidenceState>(&args.state, "VALID, INVALID or EXPIRED")?;
            storage.set_evidence_state(args.evidence_id, state, args.reason.as_deref())?;
            println!(
                "Evidence #{} marked {}",
                args.evidence_id,
                state_label(state.as_ref())
            );
            Ok(())
        }
        EvidenceCommand::Remove(args) => {
            storage.remove_evidence(args.evidence_id)?;
            println!("Removed evidence #{}", args.evidence_id);
            Ok(())
        }
    }
}

fn render_framework_overview(
    framework: &FrameworkRecord,
    controls: &[ControlRecord],
) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", framework.name);
    if !framework.description.is_empty() {
        let _ = writeln!(&mut out, "{}", framework.description);
    }

    let implemented = controls
        .iter()
        .filter(|control| control.state == ControlState::Implemented)
        .count();
    let _ = writeln!(
        &mut out,
        "{} out of {} controls validated",
        implemented,
        controls.len()
    );

    // Controls arrive sorted by category; the map keeps that order so
    // categories print the way the overview groups them.
    let mut by_category: IndexMap<String, Vec<&ControlRecord>> = IndexMap::new();
    for control in controls {
        let category = if control.category.is_empty() {
            "Uncategorized".to_string()
        } else {
            control.category.clone()
        };
        by_category.entry(category).or_default().push(control);
    }

    for (category, controls) in &by_category {
        let done = controls
            .iter()
            .filter(|control| control.state == ControlState::Implemented)
            .count();
        let _ = writeln!(&mut out);
        let _ = writeln!(&mut out, "{}  {}/{} validated", category, done, controls.len());
        for control in controls {
            let mark = if control.state == ControlState::Implemented {
                "[x]"
            } else {
                "[ ]"
            };
            let _ = writeln!(
                &mut out,
                "  {} #{} {}  ({})",
                mark,
                control.id,
                control.name,
                control.importance.as_ref()
            );
        }
    }
    out
}

fn render_task_list(
    tasks: &[TaskRecord],
    query: &str,
    status: &str,
    sort: Option<SortKey>,
) -> String {
    let view = browse::browse(tasks, query, status, sort);
    if view.is_empty() {
        return "No tasks found.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(&mut out, "Showing {} of {} tasks", view.len(), tasks.len());
    let _ = writeln!(&mut out);
    for task in view {
        let _ = writeln!(
            &mut out,
            "#{}  {}  [{}]",
            task.id,
            task.name,
            state_label(task.state.as_ref())
        );
        let _ = writeln!(&mut out, "    control  {}", task.control_name);
        if let Some(estimate) = task.time_estimate.as_deref() {
            let _ = writeln!(&mut out, "    est.     {}", format_duration(estimate));
        }
        if let Some(assignee) = task.assignee_name.as_deref() {
            let _ = writeln!(&mut out, "    owner    {}", assignee);
        }
        if task.evidence_count > 0 {
            let plural = if task.evidence_count == 1 { "" } else { "s" };
            let _ = writeln!(
                &mut out,
                "    files    {} evidence file{}",
                task.evidence_count, plural
            );
        }
        out.push('\n');
    }
    out
}

fn render_task_detail(task: &TaskRecord, evidence: &[EvidenceRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "#{}  {}  [{}]  (v{})",
        task.id,
        task.name,
        state_label(task.state.as_ref()),
        task.version
    );
    let _ = writeln!(&mut out, "Control: {}", task.control_name);
    match task.time_estimate.as_deref() {
        Some(estimate) => {
            let _ = writeln!(&mut out, "Estimate: {}", format_duration(estimate));
        }
        None => {
            let _ = writeln!(&mut out, "Estimate: none");
        }
    }
    match task.assignee_name.as_deref() {
        Some(assignee) => {
            let _ = writeln!(&mut out, "Assigned to: {assignee}");
        }
        None => {
            let _ = writeln!(&mut out, "Unassigned");
        }
    }
    if !task.description.trim().is_empty() {
        let _ = writeln!(&mut out);
        let _ = writeln!(&mut out, "{}", task.description.trim_end());
    }
    if !evidence.is_empty() {
        let _ = writeln!(&mut out);
        out.push_str(&render_evidence_list(evidence));
    }
    out
}

fn render_evidence_list(evidence: &[EvidenceRecord]) -> String {
    if evidence.is_empty() {
        return "No evidence attached.\n".to_string();
    }
    let mut out = String::new();
    for item in evidence {
        let kind = FileKind::from_mime(&item.mime_type);
        let _ = writeln!(
            &mut out,
            "#{}  [{}] {}  {}  [{}]  added {}",
            item.id,
            kind.glyph(),
            item.filename,
            format_file_size(item.size),
            state_label(item.state.as_ref()),
            format_month_day(&item.created_at)
        );
    }
    out
}

fn render_policy_list(
    policies: &[PolicyRecord],
    query: &str,
    status: &str,
    sort: Option<SortKey>,
) -> String {
    let view = browse::browse(policies, query, status, sort);
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "Showing {} of {} policies",
        view.len(),
        policies.len()
    );
    let _ = writeln!(&mut out);
    if view.is_empty() {
        let _ = writeln!(&mut out, "No policies found.");
        return out;
    }
    for policy in view {
        let _ = writeln!(
            &mut out,
            "#{}  {}  [{}]",
            policy.id,
            policy.name,
            state_label(policy.status.as_ref())
        );
        let description = if policy.content.trim().is_empty() {
            "No description available".to_string()
        } else {
            excerpt(&policy.content).replace('\n', " ")
        };
        let _ = writeln!(&mut out, "    {}", description);
        let _ = writeln!(
            &mut out,
            "    Last updated: {}",
            format_day(&policy.updated_at)
        );
        out.push('\n');
    }
    out
}

fn print_history(storage: &StorageHandle, kind: RecordKind, record_id: i64) -> Result<()> {
    let transitions = storage.list_transitions(kind, record_id)?;
    if transitions.is_empty() {
        println!("No state changes recorded.");
        return Ok(());
    }
    for transition in transitions {
        let from = transition
            .from_state
            .map(|state| state_label(&state))
            .unwrap_or_else(|| "(created)".to_string());
        let mut line = format!(
            "{}  {} -> {}",
            format_date_time(&transition.created_at),
            from,
            state_label(&transition.to_state)
        );
        if let Some(reason) = transition.reason {
            let _ = write!(line, "  ({reason})");
        }
        println!("{line}");
    }
    Ok(())
}

/// Maps a stale-version failure to actionable CLI wording; everything
/// else propagates untouched.
fn apply_versioned<T>(result: Result<T>) -> Result<T> {
    result.map_err(|err| match err.downcast_ref::<StorageError>() {
        Some(StorageError::VersionConflict { kind, id, actual, .. }) => anyhow!(
            "{kind} #{id} changed concurrently (now at version {actual}); \
             re-check it and retry with --expect-version {actual}"
        ),
        _ => err,
    })
}

fn parse_state<T>(raw: &str, expected: &str) -> Result<T>
where
    T: FromStr,
{
    raw.trim()
        .to_uppercase()
        .parse()
        .map_err(|_| anyhow!("unknown value '{raw}' (expected {expected})"))
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn format_day(timestamp: &str) -> String {
    OffsetDateTime::parse(timestamp, &Rfc3339)
        .map(|dt| dt.date().to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// `Jan 5, 2025`, the evidence-row date style.
fn format_month_day(timestamp: &str) -> String {
    let format = format_description!("[month repr:short] [day padding:none], [year]");
    OffsetDateTime::parse(timestamp, &Rfc3339)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| timestamp.to_string())
}

fn format_date_time(timestamp: &str) -> String {
    let format =
        format_description!("[month repr:short] [day padding:none], [year] [hour]:[minute]");
    OffsetDateTime::parse(timestamp, &Rfc3339)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::storage;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    fn setup_storage() -> TestResult<(TempDir, StorageHandle)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let root = temp.path();
        let paths = ConfigPaths {
            config_dir: root.join("config"),
            config_file: root.join("config/config.toml"),
            data_dir: root.join("data"),
            database_path: root.join("data/registers.db"),
            evidence_dir: root.join("data/evidence"),
            cache_dir: root.join("cache"),
            log_dir: root.join("logs"),
            state_dir: root.join("state"),
        };
        let mut storage_opts = StorageOptions::default();
        storage_opts.database_path = paths.database_path.clone();
        storage_opts.evidence_dir = paths.evidence_dir.clone();

        let handle = storage::init(&paths, &storage_opts)?;
        Ok((temp, handle))
    }

    fn seed_control(storage: &StorageHandle) -> TestResult<i64> {
        let framework_id = storage.create_framework("ISO 27001", "")?;
        let control_id = storage.create_control(
            framework_id,
            "Asset inventory",
            "",
            "Asset Management",
            Importance::Mandatory,
        )?;
        Ok(control_id)
    }

    #[test]
    fn policy_list_filters_sorts_and_excerpts() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        storage.create_policy(
            "Zulu Policy",
            "<h1>Zulu</h1>\n<p>Retention rules &amp; schedules</p>",
            PolicyStatus::Active,
        )?;
        storage.create_policy("Alpha Policy", "", PolicyStatus::Draft)?;
        // The first-run seed also plants a policy; keep the fixture to the
        // two created above.
        let policies: Vec<_> = storage
            .list_policies()?
            .into_iter()
            .filter(|policy| policy.name == "Alpha Policy" || policy.name == "Zulu Policy")
            .collect();

        let output = render_policy_list(&policies, "", "ALL", SortKey::parse("name-asc"));
        let alpha_at = output.find("Alpha Policy").expect("alpha listed");
        let zulu_at = output.find("Zulu Policy").expect("zulu listed");
        assert!(alpha_at < zulu_at, "name-asc puts Alpha first");
        assert!(output.contains("Retention rules & schedules"));
        assert!(output.contains("No description available"));

        let drafts = render_policy_list(&policies, "", "DRAFT", SortKey::parse("name-asc"));
        assert!(drafts.contains("Showing 1 of 2 policies"));
        assert!(!drafts.contains("Zulu Policy"));

        let searched = render_policy_list(&policies, "zul", "ALL", SortKey::parse("name-asc"));
        assert!(searched.contains("Zulu Policy"));
        assert!(!searched.contains("Alpha Policy"));
        Ok(())
    }

    #[test]
    fn framework_overview_groups_and_counts() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        let framework_id = storage.create_framework("ISO 27001", "ISMS requirements")?;
        let inventory = storage.create_control(
            framework_id,
            "Asset inventory",
            "",
            "Asset Management",
            Importance::Mandatory,
        )?;
        storage.create_control(
            framework_id,
            "Key rotation",
            "",
            "Cryptography",
            Importance::Advanced,
        )?;
        storage.set_control_state(inventory, ControlState::Implemented, None, None)?;

        let framework = storage.fetch_framework(framework_id)?.expect("framework");
        let controls = storage.list_controls(framework_id)?;
        let output = render_framework_overview(&framework, &controls);

        assert!(output.contains("1 out of 2 controls validated"));
        assert!(output.contains("Asset Management  1/1 validated"));
        assert!(output.contains("Cryptography  0/1 validated"));
        assert!(output.contains(&format!("[x] #{inventory} Asset inventory  (MANDATORY)")));
        let assets_at = output.find("Asset Management").expect("category listed");
        let crypto_at = output.find("Cryptography").expect("category listed");
        assert!(assets_at < crypto_at, "categories keep name order");
        Ok(())
    }

    #[test]
    fn task_list_respects_status_filter_and_estimate() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        let control_id = seed_control(&storage)?;
        let estimate = build_duration("2", "", "30");
        assert_eq!(estimate, "P2DT30M");
        storage.create_task(control_id, "Collect list", "", Some(&estimate))?;
        let done = storage.create_task(control_id, "Ship report", "", None)?;
        storage.set_task_state(done, TaskState::Done, None)?;

        let tasks = storage.list_tasks(Some(control_id))?;
        let todos = render_task_list(&tasks, "", "TODO", None);
        assert!(todos.contains("Collect list"));
        assert!(todos.contains("est.     2 days, 30 minutes"));
        assert!(!todos.contains("Ship report"));

        let all = render_task_list(&tasks, "ship", "ALL", None);
        assert!(all.contains("Ship report"));
        assert!(!all.contains("Collect list"));
        Ok(())
    }

    #[test]
    fn assign_by_search_needs_a_unique_match() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        let control_id = seed_control(&storage)?;
        let task_id = storage.create_task(control_id, "Review access", "", None)?;
        storage.add_person("Ada Lovelace", "ada@example.com", &[])?;
        storage.add_person("Adam Osborne", "adam@example.com", &[])?;

        let ambiguous = task_assign(
            &storage,
            TaskAssignArgs {
                task_id,
                person: None,
                search: Some("ada".into()),
            },
        );
        assert!(ambiguous.is_err(), "two matches must not auto-assign");

        task_assign(
            &storage,
            TaskAssignArgs {
                task_id,
                person: None,
                search: Some("lovelace".into()),
            },
        )?;
        let task = storage.fetch_task(task_id)?.expect("task present");
        assert_eq!(task.assignee_name.as_deref(), Some("Ada Lovelace"));
        Ok(())
    }

    #[test]
    fn version_conflicts_render_actionable_wording() -> TestResult {
        let (_temp, storage) = setup_storage()?;
        let control_id = seed_control(&storage)?;
        let task_id = storage.create_task(control_id, "Racy task", "", None)?;
        storage.set_task_state(task_id, TaskState::Done, None)?;

        let err = apply_versioned(storage.set_task_state(task_id, TaskState::Todo, Some(1)))
            .expect_err("stale version must fail");
        let message = err.to_string();
        assert!(message.contains("changed concurrently"));
        assert!(message.contains("--expect-version 2"));
        Ok(())
    }

    #[test]
    fn evidence_listing_shows_kind_size_and_state() -> TestResult {
        let (temp, storage) = setup_storage()?;
        let control_id = seed_control(&storage)?;
        let task_id = storage.create_task(control_id, "Export report", "", None)?;
        let source = temp.path().join("report.pdf");
        std::fs::write(&source, vec![0u8; 1536])?;
        let evidence = storage.attach_evidence(task_id, &source)?;
        storage.set_evidence_state(evidence.id, EvidenceState::Expired, None)?;

        let listing = render_evidence_list(&storage.list_evidence(task_id)?);
        assert!(listing.contains("[pdf] report.pdf"));
        assert!(listing.contains("1.5 KB"));
        assert!(listing.contains("[Expired]"));
        Ok(())
    }

    #[test]
    fn unknown_state_strings_are_rejected_with_choices() {
        let err = parse_state::<ControlState>("half-done", "NOT_STARTED, ...")
            .expect_err("bogus state must fail");
        assert!(err.to_string().contains("half-done"));
        assert!(parse_state::<TaskState>("done", "TODO or DONE").is_ok());
    }
}
