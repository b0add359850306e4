//! Projection of a raw student graph result into typed views.
//!
//! Every projector accepts the raw result array as returned by the fetch
//! collaborator. Input that is not an array, is empty, or cannot be decoded
//! yields the view's empty shape.

use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use crate::codec;
use crate::graph::{GraphNode, RelationshipKind, StudentRecord};
use crate::models::{
    Degree, EnrolledCourse, PastSemesterCourse, PastSemesterMap, Semester, SimilarStudent,
    StudentOverview, StudentProfile, Validation,
};
use crate::summary;

fn record(rows: &Value) -> Option<StudentRecord> {
    StudentRecord::from_rows(rows).ok()
}

pub fn project_profile(rows: &Value) -> StudentProfile {
    record(rows).map(|r| profile_of(&r)).unwrap_or_default()
}

pub fn project_degrees(rows: &Value) -> Vec<Degree> {
    record(rows).map(|r| degrees_of(&r)).unwrap_or_default()
}

pub fn project_enrolled_courses(rows: &Value) -> Vec<EnrolledCourse> {
    record(rows).map(|r| enrolled_of(&r)).unwrap_or_default()
}

pub fn project_past_semesters(rows: &Value) -> PastSemesterMap {
    record(rows).map(|r| past_semesters_of(&r)).unwrap_or_default()
}

pub fn project_similar_students(rows: &Value) -> Vec<SimilarStudent> {
    record(rows).map(|r| similar_of(&r)).unwrap_or_default()
}

/// Runs [`validate`] and then every projector over one decoded record.
///
/// Validation problems are reported in `error` alongside whatever the
/// projectors could still read. Only a record that cannot be decoded at all
/// yields the empty overview; nothing is returned as `Err`.
pub fn project_all(rows: &Value) -> StudentOverview {
    let validation = validate(rows);
    let problems = (!validation.is_valid).then(|| validation.errors.join("; "));

    match StudentRecord::from_rows(rows) {
        Ok(record) => {
            if let Some(message) = &problems {
                warn!(error = %message, "student data failed validation");
            }
            let past_semesters = past_semesters_of(&record);
            StudentOverview {
                student_info: profile_of(&record),
                degrees: degrees_of(&record),
                enrolled_courses: enrolled_of(&record),
                past_semester_summary: summary::summarize_all(&past_semesters),
                past_semesters,
                similar_students: similar_of(&record),
                error: problems,
            }
        }
        Err(err) => {
            let message = problems.unwrap_or_else(|| err.to_string());
            warn!(error = %message, "error parsing student data");
            StudentOverview {
                error: Some(message),
                ..Default::default()
            }
        }
    }
}

/// Structural check of a raw result, reporting every problem it can see.
pub fn validate(rows: &Value) -> Validation {
    let mut errors = Vec::new();

    let Some(rows) = rows.as_array() else {
        errors.push("Data must be an array".to_string());
        return Validation { is_valid: false, errors };
    };
    let Some(first) = rows.first() else {
        errors.push("Data array is empty".to_string());
        return Validation { is_valid: false, errors };
    };
    let Some(student) = first.as_object() else {
        errors.push("Student data object is missing or invalid".to_string());
        return Validation { is_valid: false, errors };
    };

    let has_properties = student
        .get("s")
        .or_else(|| student.get("subject"))
        .and_then(|s| s.get("properties"))
        .is_some_and(Value::is_object);
    if !has_properties {
        errors.push("Student properties are missing".to_string());
    }
    if !student.get("relationships").is_some_and(Value::is_array) {
        errors.push("Relationships array is missing or invalid".to_string());
    }

    Validation {
        is_valid: errors.is_empty(),
        errors,
    }
}

fn profile_of(record: &StudentRecord) -> StudentProfile {
    record
        .subject
        .as_ref()
        .map(profile_from_node)
        .unwrap_or_default()
}

fn profile_from_node(node: &GraphNode) -> StudentProfile {
    let p = &node.properties;
    StudentProfile {
        id: p.string("id"),
        name: p.string("name"),
        learning_style: p.string("learningStyle"),
        preferred_course_load: p.integer("preferredCourseLoad"),
        preferred_instruction_mode: p.string("preferredInstructionMode"),
        work_hours_per_week: p.integer("workHoursPerWeek"),
        financial_aid_status: p.string("financialAidStatus"),
        preferred_pace: p.string("preferredPace"),
        enrollment_date: p.string("enrollmentDate"),
        expected_graduation: p.string("expectedGraduation"),
    }
}

fn degrees_of(record: &StudentRecord) -> Vec<Degree> {
    let mut seen = HashSet::new();
    record
        .related(RelationshipKind::Pursuing)
        .filter_map(|(_, target)| {
            let p = &target.properties;
            let id = p.string("id");
            if !seen.insert(id.clone()) {
                return None;
            }
            Some(Degree {
                id,
                name: p.string("name"),
                department: p.string("department"),
                degree_type: p.string("type"),
                total_credits_required: p.integer("totalCreditsRequired"),
                core_credits_required: p.integer("coreCreditsRequired"),
                elective_credits_required: p.integer("electiveCreditsRequired"),
            })
        })
        .collect()
}

fn enrolled_of(record: &StudentRecord) -> Vec<EnrolledCourse> {
    record
        .related(RelationshipKind::EnrolledIn)
        .map(|(rel, target)| {
            let p = &target.properties;
            EnrolledCourse {
                id: p.string("id"),
                name: p.string("name"),
                department: p.string("department"),
                credits: p.integer("credits"),
                level: p.integer("level"),
                avg_difficulty: p.number("avgDifficulty"),
                avg_time_commitment: p.number("avgTimeCommitment"),
                tags: p.strings("tags"),
                term_availability: p.strings("termAvailability"),
                instruction_modes: p.strings("instructionModes"),
                auditory_learner_success: p.number("auditoryLearnerSuccess"),
                reading_learner_success: p.number("readingLearnerSuccess"),
                kinesthetic_learner_success: p.number("kinestheticLearnerSuccess"),
                visual_learner_success: p.number("visualLearnerSuccess"),
                term: rel.properties.string("term"),
            }
        })
        .collect()
}

pub(crate) fn past_semesters_of(record: &StudentRecord) -> PastSemesterMap {
    let mut semesters = PastSemesterMap::new();

    for (rel, target) in record.related(RelationshipKind::Completed) {
        let term = rel.properties.string("term");
        if term.is_empty() {
            continue;
        }
        let p = &target.properties;
        let course = PastSemesterCourse {
            id: p.string("id"),
            name: p.string("name"),
            department: p.string("department"),
            credits: p.integer("credits"),
            level: p.integer("level"),
            grade: codec::decode_string(rel.merged("grade")),
            difficulty: codec::decode_number(rel.merged("difficulty")),
            time_spent: codec::decode_number(rel.merged("timeSpent")),
            instruction_mode: codec::decode_string(rel.merged("instructionMode")),
            enjoyment: codec::decode_optional_number(rel.merged("enjoyment")),
            tags: p.strings("tags"),
            term_availability: p.strings("termAvailability"),
            instruction_modes: p.strings("instructionModes"),
        };
        semesters
            .entry(term.clone())
            .or_insert_with(|| Semester {
                term,
                courses: Vec::new(),
            })
            .courses
            .push(course);
    }

    for semester in semesters.values_mut() {
        semester.courses.sort_by(|a, b| a.id.cmp(&b.id));
    }
    semesters
}

fn similar_of(record: &StudentRecord) -> Vec<SimilarStudent> {
    let mut similar: Vec<SimilarStudent> = record
        .related(RelationshipKind::SimilarLearningStyle)
        .map(|(rel, target)| SimilarStudent {
            profile: profile_from_node(target),
            similarity: rel.properties.number("similarity"),
        })
        .collect();

    similar.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    similar
}
