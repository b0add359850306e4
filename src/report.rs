use std::fmt::Write;

use crate::models::{SessionStats, StudentOverview, StudyHabits, TermStats};

/// Renders minutes as `"45m"`, `"1h 30m"` or `"2h"`.
pub fn format_duration(minutes: f64) -> String {
    let total = minutes.max(0.0).round() as u64;
    let (hours, mins) = (total / 60, total % 60);
    match (hours, mins) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

/// `"Spring2024"` becomes `"Spring 2024"`; other labels pass through.
pub fn format_term(term: &str) -> String {
    for season in ["Spring", "Summer", "Fall", "Winter"] {
        if let Some(year) = term.strip_prefix(season) {
            if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
                return format!("{season} {year}");
            }
        }
    }
    term.to_string()
}

fn format_gpa(gpa: Option<f64>) -> String {
    gpa.map_or_else(|| "n/a".to_string(), |value| format!("{value:.2}"))
}

pub fn build_report(overview: &StudentOverview, habits: &StudyHabits) -> String {
    let mut output = String::new();
    let student = &overview.student_info;

    let _ = writeln!(output, "# Academic Record: {}", student.name);
    let _ = writeln!(
        output,
        "Student {} ({} learner, {} pace), expected graduation {}",
        student.id,
        or_unknown(&student.learning_style),
        or_unknown(&student.preferred_pace),
        or_unknown(&student.expected_graduation)
    );
    if let Some(error) = &overview.error {
        let _ = writeln!(output);
        let _ = writeln!(output, "> Data could not be read: {error}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Degrees");
    if overview.degrees.is_empty() {
        let _ = writeln!(output, "No degree programs on record.");
    } else {
        for degree in &overview.degrees {
            let _ = writeln!(
                output,
                "- {} ({}, {}) requires {} credits",
                degree.name, degree.degree_type, degree.department, degree.total_credits_required
            );
        }
    }

    let summary = &overview.past_semester_summary;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Academic Performance");
    let _ = writeln!(
        output,
        "Cumulative GPA {} over {} courses and {} credits in {} semesters.",
        format_gpa(summary.average_grade),
        summary.total_courses,
        summary.total_credits,
        summary.total_semesters
    );
    let mut terms: Vec<&str> = summary.semester_breakdown.keys().map(String::as_str).collect();
    crate::habits::order_terms(&mut terms);
    for term in terms {
        let breakdown = &summary.semester_breakdown[term];
        let _ = writeln!(
            output,
            "- {}: GPA {} across {} courses ({} credits)",
            format_term(term),
            format_gpa(breakdown.average_grade),
            breakdown.course_count,
            breakdown.credits
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Current Enrollment");
    if overview.enrolled_courses.is_empty() {
        let _ = writeln!(output, "Not enrolled in any courses.");
    } else {
        for course in &overview.enrolled_courses {
            let _ = writeln!(
                output,
                "- {} {} ({} credits)",
                course.id, course.name, course.credits
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Study Habits");
    match &habits.current_term {
        Some(current) => write_term(&mut output, current),
        None => {
            let _ = writeln!(output, "No study sessions recorded.");
        }
    }
    if habits.overall_stats.total_sessions > 0 {
        let _ = writeln!(output);
        let _ = writeln!(output, "Overall:");
        write_sessions(&mut output, &habits.overall_stats);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Similar Students");
    if overview.similar_students.is_empty() {
        let _ = writeln!(output, "No similar students found.");
    } else {
        for similar in overview.similar_students.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) similarity {:.2}",
                similar.profile.name, similar.profile.id, similar.similarity
            );
        }
    }

    output
}

fn write_term(output: &mut String, stats: &TermStats) {
    let _ = writeln!(output, "Current term: {}", format_term(&stats.term));
    write_sessions(output, &stats.sessions);
    let _ = writeln!(output, "- Term GPA {}", format_gpa(stats.gpa.average_grade));
}

fn write_sessions(output: &mut String, stats: &SessionStats) {
    let _ = writeln!(
        output,
        "- {} sessions, {} total",
        stats.total_sessions,
        format_duration(stats.total_time_spent)
    );
    if let Some(average) = stats.average_session_duration {
        let _ = writeln!(output, "- Average session {}", format_duration(average));
    }
    if let Some(effectiveness) = stats.average_effectiveness {
        let _ = writeln!(output, "- Average effectiveness {effectiveness:.1}");
    }

    let mut methods: Vec<_> = stats.effectiveness_by_method.iter().collect();
    methods.sort_by(|a, b| {
        b.1.average_effectiveness
            .partial_cmp(&a.1.average_effectiveness)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if let Some((method, best)) = methods.first() {
        let _ = writeln!(
            output,
            "- Most effective method: {} ({:.1})",
            method, best.average_effectiveness
        );
    }
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}
