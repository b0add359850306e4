use crate::models::{AcademicSummary, PastSemesterCourse, PastSemesterMap, TermSummary};

/// Points for a letter grade. Unknown grades are worth nothing but their
/// credits still count.
pub fn grade_points(grade: &str) -> f64 {
    match grade {
        "A+" | "A" => 4.0,
        "A-" => 3.7,
        "B+" => 3.3,
        "B" => 3.0,
        "B-" => 2.7,
        "C+" => 2.3,
        "C" => 2.0,
        "C-" => 1.7,
        "D+" => 1.3,
        "D" => 1.0,
        "D-" => 0.7,
        _ => 0.0,
    }
}

pub fn summarize_term(term: &str, courses: &[PastSemesterCourse]) -> TermSummary {
    let mut summary = TermSummary {
        term: term.to_string(),
        course_count: courses.len(),
        ..Default::default()
    };
    let mut weighted_points = 0.0;

    for course in courses {
        *summary
            .grade_distribution
            .entry(course.grade.clone())
            .or_insert(0) += 1;
        weighted_points += grade_points(&course.grade) * course.credits as f64;
        summary.credits += course.credits;
    }

    summary.average_grade = weighted_average(weighted_points, summary.credits);
    summary
}

pub fn summarize_all(semesters: &PastSemesterMap) -> AcademicSummary {
    let mut summary = AcademicSummary {
        total_semesters: semesters.len(),
        ..Default::default()
    };
    let mut weighted_points = 0.0;

    for (term, semester) in semesters {
        for course in &semester.courses {
            *summary
                .grade_distribution
                .entry(course.grade.clone())
                .or_insert(0) += 1;
            weighted_points += grade_points(&course.grade) * course.credits as f64;
            summary.total_credits += course.credits;
            summary.total_courses += 1;
        }
        summary
            .semester_breakdown
            .insert(term.clone(), summarize_term(term, &semester.courses));
    }

    summary.average_grade = weighted_average(weighted_points, summary.total_credits);
    summary
}

fn weighted_average(weighted_points: f64, credits: i64) -> Option<f64> {
    if credits == 0 {
        return None;
    }
    Some(round2(weighted_points / credits as f64))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
