//! Study-session aggregation per term and overall.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::graph::{RelationshipKind, StudentRecord, COURSE, STUDY_SESSION};
use crate::models::{
    LocationStats, MethodStats, PastSemesterCourse, SessionStats, StudyHabits, TermStats,
};
use crate::projector;
use crate::summary;

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("valid year pattern"));
static SEASON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Spring|Summer|Fall|Winter)").expect("valid season pattern"));

const GROUP_STUDY: &str = "Group Study";
const UNKNOWN: &str = "Unknown";

/// One `ATTENDED` study session, decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudySession {
    pub term_id: String,
    pub duration: f64,
    pub effectiveness: f64,
    pub location: String,
    pub method: String,
    pub start_month: Option<u32>,
}

/// Sort key for term labels such as `Fall2024`.
///
/// Labels without a four-digit year rank as year 0, and labels without a
/// known season rank below every season of the same year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TermRank {
    pub year: u32,
    pub season: u8,
}

impl TermRank {
    pub fn of(term: &str) -> Self {
        let year = YEAR
            .find(term)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let season = match SEASON.find(term).map(|m| m.as_str()) {
            Some("Spring") => 1,
            Some("Summer") => 2,
            Some("Fall") => 3,
            Some("Winter") => 4,
            _ => 0,
        };
        Self { year, season }
    }
}

/// Orders terms most recent first.
pub fn order_terms<S: AsRef<str>>(terms: &mut [S]) {
    terms.sort_by_key(|term| Reverse(TermRank::of(term.as_ref())));
}

pub fn aggregate_study_habits(rows: &Value) -> StudyHabits {
    let Ok(record) = StudentRecord::from_rows(rows) else {
        return StudyHabits::default();
    };

    let sessions = sessions_of(&record);
    let courses_by_term = completed_courses_by_term(&record);

    let mut sessions_by_term: BTreeMap<&str, Vec<StudySession>> = BTreeMap::new();
    for session in sessions.iter().filter(|s| !s.term_id.is_empty()) {
        sessions_by_term
            .entry(session.term_id.as_str())
            .or_default()
            .push(session.clone());
    }

    let mut terms: Vec<&str> = sessions_by_term.keys().copied().collect();
    order_terms(&mut terms);

    let mut habits = StudyHabits {
        overall_stats: aggregate_overall(&sessions),
        ..Default::default()
    };
    for (index, term) in terms.into_iter().enumerate() {
        let courses = courses_by_term.get(term).map(Vec::as_slice).unwrap_or(&[]);
        let stats = process_term_sessions(&sessions_by_term[term], term, courses);
        if index == 0 {
            habits.current_term = Some(stats);
        } else {
            habits.past_terms.insert(term.to_string(), stats);
        }
    }
    habits
}

pub fn process_term_sessions(
    sessions: &[StudySession],
    term: &str,
    courses: &[PastSemesterCourse],
) -> TermStats {
    TermStats {
        term: term.to_string(),
        sessions: aggregate_overall(sessions),
        gpa: summary::summarize_term(term, courses),
    }
}

/// Engagement statistics over any set of sessions. Zero sessions give zero
/// counts, absent averages and empty collections.
pub fn aggregate_overall(sessions: &[StudySession]) -> SessionStats {
    let mut stats = SessionStats {
        total_sessions: sessions.len(),
        ..Default::default()
    };
    if sessions.is_empty() {
        return stats;
    }

    let count = sessions.len() as f64;
    stats.total_time_spent = sessions.iter().map(|s| s.duration).sum();
    stats.average_session_duration = Some(stats.total_time_spent / count);
    stats.average_effectiveness =
        Some(sessions.iter().map(|s| s.effectiveness).sum::<f64>() / count);

    stats.locations = distinct(sessions.iter().map(|s| s.location.as_str()));
    stats.study_methods = distinct(sessions.iter().map(|s| s.method.as_str()));
    stats.unique_locations = stats.locations.len();
    stats.unique_methods = stats.study_methods.len();
    stats.group_study_sessions = sessions.iter().filter(|s| s.method == GROUP_STUDY).count();

    for session in sessions {
        let method = stats
            .effectiveness_by_method
            .entry(label_or_unknown(&session.method))
            .or_insert_with(MethodStats::default);
        method.sessions += 1;
        method.total_effectiveness += session.effectiveness;

        let location = stats
            .time_by_location
            .entry(label_or_unknown(&session.location))
            .or_insert_with(LocationStats::default);
        location.sessions += 1;
        location.total_time += session.duration;

        if let Some(month) = session.start_month {
            *stats.sessions_by_month.entry(month).or_insert(0) += 1;
        }
    }
    for method in stats.effectiveness_by_method.values_mut() {
        method.average_effectiveness = method.total_effectiveness / method.sessions as f64;
    }
    for location in stats.time_by_location.values_mut() {
        location.average_time = location.total_time / location.sessions as f64;
    }

    stats
}

fn sessions_of(record: &StudentRecord) -> Vec<StudySession> {
    record
        .related(RelationshipKind::Attended)
        .filter(|(_, target)| target.has_label(STUDY_SESSION))
        .map(|(_, target)| {
            let p = &target.properties;
            let start_month = p
                .get("startTime")
                .and_then(|start| start.get("month"))
                .map(|month| crate::codec::decode_integer(Some(month)))
                .and_then(|month| u32::try_from(month).ok())
                .filter(|month| (1..=12).contains(month));
            StudySession {
                term_id: p.string("termId"),
                duration: p.number("duration"),
                effectiveness: p.number("effectiveness"),
                location: p.string("location"),
                method: p.string("method"),
                start_month,
            }
        })
        .collect()
}

fn completed_courses_by_term(record: &StudentRecord) -> BTreeMap<String, Vec<PastSemesterCourse>> {
    let filtered = StudentRecord {
        subject: None,
        relationships: record
            .relationships
            .iter()
            .filter(|rel| rel.target.as_ref().is_some_and(|t| t.has_label(COURSE)))
            .cloned()
            .collect(),
    };
    projector::past_semesters_of(&filtered)
        .into_iter()
        .map(|(term, semester)| (term, semester.courses))
        .collect()
}

fn distinct<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .filter(|label| !label.is_empty() && seen.insert(*label))
        .map(str::to_string)
        .collect()
}

fn label_or_unknown(label: &str) -> String {
    if label.is_empty() {
        UNKNOWN.to_string()
    } else {
        label.to_string()
    }
}
