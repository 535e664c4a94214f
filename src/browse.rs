use std::cmp::Ordering;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::storage::PersonRecord;

/// Sentinel status filter that matches every record.
pub const STATUS_ALL: &str = "ALL";

/// Anything that can appear in a searchable, sortable register view.
pub trait Browsable {
    fn name(&self) -> &str;
    fn status(&self) -> &str;
    fn created_at(&self) -> &str;
    fn updated_at(&self) -> &str;
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr,
)]
pub enum SortKey {
    #[strum(serialize = "name-asc")]
    NameAsc,
    #[strum(serialize = "name-desc")]
    NameDesc,
    #[strum(serialize = "updated-desc")]
    UpdatedDesc,
    #[strum(serialize = "updated-asc")]
    UpdatedAsc,
    #[strum(serialize = "created-desc")]
    CreatedDesc,
    #[strum(serialize = "created-asc")]
    CreatedAsc,
}

impl SortKey {
    pub const ALL: [SortKey; 6] = [
        SortKey::NameAsc,
        SortKey::NameDesc,
        SortKey::UpdatedDesc,
        SortKey::UpdatedAsc,
        SortKey::CreatedDesc,
        SortKey::CreatedAsc,
    ];

    /// Unknown strings yield `None`, which `browse` treats as "leave the
    /// incoming order alone".
    pub fn parse(raw: &str) -> Option<SortKey> {
        raw.parse().ok()
    }

    pub fn next(self) -> SortKey {
        let idx = Self::ALL.iter().position(|key| *key == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::NameAsc => "Name (A-Z)",
            SortKey::NameDesc => "Name (Z-A)",
            SortKey::UpdatedDesc => "Recently updated",
            SortKey::UpdatedAsc => "Oldest updated",
            SortKey::CreatedDesc => "Recently created",
            SortKey::CreatedAsc => "Oldest created",
        }
    }
}

/// Produces the filtered, ordered view of a register.
///
/// A record passes the filter when the status filter is `"ALL"` or equals
/// the record status exactly, and its name contains the query
/// case-insensitively (the empty query matches everything). Passing
/// `None` for the sort key preserves the incoming order. Never panics:
/// an unparseable timestamp simply sorts after every parseable one.
pub fn browse<'a, T: Browsable>(
    records: &'a [T],
    query: &str,
    status_filter: &str,
    sort: Option<SortKey>,
) -> Vec<&'a T> {
    let needle = query.to_lowercase();
    let mut view: Vec<&T> = records
        .iter()
        .filter(|record| {
            let status_matches =
                status_filter == STATUS_ALL || record.status() == status_filter;
            status_matches && record.name().to_lowercase().contains(&needle)
        })
        .collect();

    let Some(sort) = sort else {
        return view;
    };

    view.sort_by(|a, b| match sort {
        SortKey::NameAsc => compare_names(a.name(), b.name()),
        SortKey::NameDesc => compare_names(b.name(), a.name()),
        SortKey::UpdatedDesc => compare_timestamps(b.updated_at(), a.updated_at()),
        SortKey::UpdatedAsc => compare_timestamps(a.updated_at(), b.updated_at()),
        SortKey::CreatedDesc => compare_timestamps(b.created_at(), a.created_at()),
        SortKey::CreatedAsc => compare_timestamps(a.created_at(), b.created_at()),
    });
    view
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

// Unparseable timestamps sort last in either direction. The `b, a`
// argument swap for descending keys flips parseable comparisons but must
// not flip the missing-value rule, hence the explicit match.
fn compare_timestamps(a: &str, b: &str) -> Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
}

/// People search for the assignment picker: case-insensitive containment
/// over full name or primary email; the empty term matches everyone.
pub fn filter_people<'a>(people: &'a [PersonRecord], term: &str) -> Vec<&'a PersonRecord> {
    let needle = term.to_lowercase();
    people
        .iter()
        .filter(|person| {
            needle.is_empty()
                || person.full_name.to_lowercase().contains(&needle)
                || person.primary_email.to_lowercase().contains(&needle)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Row {
        name: String,
        status: String,
        created_at: String,
        updated_at: String,
    }

    impl Row {
        fn new(name: &str, status: &str, created_at: &str, updated_at: &str) -> Self {
            Self {
                name: name.into(),
                status: status.into(),
                created_at: created_at.into(),
                updated_at: updated_at.into(),
            }
        }
    }

    impl Browsable for Row {
        fn name(&self) -> &str {
            &self.name
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

    fn fixture() -> Vec<Row> {
        vec![
            Row::new(
                "Incident Response",
                "ACTIVE",
                "2025-03-01T09:00:00Z",
                "2025-06-01T09:00:00Z",
            ),
            Row::new(
                "access review",
                "DRAFT",
                "2025-01-15T09:00:00Z",
                "2025-07-01T09:00:00Z",
            ),
            Row::new(
                "Data Retention",
                "ACTIVE",
                "2025-02-01T09:00:00Z",
                "2025-05-01T09:00:00Z",
            ),
        ]
    }

    #[test]
    fn all_filter_with_empty_query_preserves_length() {
        let rows = fixture();
        let view = browse(&rows, "", STATUS_ALL, Some(SortKey::NameAsc));
        assert_eq!(view.len(), rows.len());
        let names: Vec<_> = view.iter().map(|row| row.name()).collect();
        assert_eq!(
            names,
            vec!["access review", "Data Retention", "Incident Response"]
        );
    }

    #[test]
    fn query_match_is_case_insensitive() {
        let rows = fixture();
        let view = browse(&rows, "REVIEW", STATUS_ALL, Some(SortKey::NameAsc));
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].name(), "access review");
    }

    #[test]
    fn status_match_is_case_sensitive_and_exact() {
        let rows = fixture();
        assert_eq!(browse(&rows, "", "ACTIVE", None).len(), 2);
        assert_eq!(browse(&rows, "", "active", None).len(), 0);
        assert_eq!(browse(&rows, "", "DRAFT", None).len(), 1);
    }

    #[test]
    fn timestamp_sorts_run_both_directions() {
        let rows = fixture();
        let newest_first: Vec<_> = browse(&rows, "", STATUS_ALL, Some(SortKey::UpdatedDesc))
            .iter()
            .map(|row| row.name().to_string())
            .collect();
        assert_eq!(
            newest_first,
            vec!["access review", "Incident Response", "Data Retention"]
        );

        let oldest_created: Vec<_> = browse(&rows, "", STATUS_ALL, Some(SortKey::CreatedAsc))
            .iter()
            .map(|row| row.name().to_string())
            .collect();
        assert_eq!(
            oldest_created,
            vec!["access review", "Data Retention", "Incident Response"]
        );
    }

    #[test]
    fn unknown_sort_key_preserves_order() {
        let rows = fixture();
        assert_eq!(SortKey::parse("shuffled"), None);
        let view = browse(&rows, "", STATUS_ALL, SortKey::parse("shuffled"));
        let names: Vec<_> = view.iter().map(|row| row.name()).collect();
        assert_eq!(
            names,
            vec!["Incident Response", "access review", "Data Retention"]
        );
    }

    #[test]
    fn sort_keys_round_trip_their_wire_strings() {
        for key in SortKey::ALL {
            assert_eq!(SortKey::parse(key.as_ref()), Some(key));
        }
        assert_eq!(SortKey::parse("updated-desc"), Some(SortKey::UpdatedDesc));
    }

    #[test]
    fn unparseable_timestamps_sort_last_in_both_directions() {
        let mut rows = fixture();
        rows.push(Row::new("Broken Clock", "ACTIVE", "not-a-date", "not-a-date"));

        for key in [SortKey::UpdatedDesc, SortKey::UpdatedAsc] {
            let view = browse(&rows, "", STATUS_ALL, Some(key));
            assert_eq!(view.last().expect("non-empty view").name(), "Broken Clock");
        }
    }

    #[test]
    fn people_filter_matches_name_or_email() {
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

        assert_eq!(filter_people(&people, "").len(), 2);
        assert_eq!(filter_people(&people, "ADA")[0].id, 1);
        assert_eq!(filter_people(&people, "navy")[0].id, 2);
        assert!(filter_people(&people, "turing").is_empty());
    }
}
