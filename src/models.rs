use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub learning_style: String,
    pub preferred_course_load: i64,
    pub preferred_instruction_mode: String,
    pub work_hours_per_week: i64,
    pub financial_aid_status: String,
    pub preferred_pace: String,
    pub enrollment_date: String,
    pub expected_graduation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Degree {
    pub id: String,
    pub name: String,
    pub department: String,
    #[serde(rename = "type")]
    pub degree_type: String,
    pub total_credits_required: i64,
    pub core_credits_required: i64,
    pub elective_credits_required: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledCourse {
    pub id: String,
    pub name: String,
    pub department: String,
    pub credits: i64,
    pub level: i64,
    pub avg_difficulty: f64,
    pub avg_time_commitment: f64,
    pub tags: Vec<String>,
    pub term_availability: Vec<String>,
    pub instruction_modes: Vec<String>,
    pub auditory_learner_success: f64,
    pub reading_learner_success: f64,
    pub kinesthetic_learner_success: f64,
    pub visual_learner_success: f64,
    /// Term recorded on the enrollment edge, empty when absent.
    pub term: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastSemesterCourse {
    pub id: String,
    pub name: String,
    pub department: String,
    pub credits: i64,
    pub level: i64,
    pub grade: String,
    pub difficulty: f64,
    pub time_spent: f64,
    pub instruction_mode: String,
    pub enjoyment: Option<f64>,
    pub tags: Vec<String>,
    pub term_availability: Vec<String>,
    pub instruction_modes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Semester {
    pub term: String,
    pub courses: Vec<PastSemesterCourse>,
}

/// Completed coursework keyed by term label.
pub type PastSemesterMap = BTreeMap<String, Semester>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarStudent {
    #[serde(flatten)]
    pub profile: StudentProfile,
    pub similarity: f64,
}

pub type GradeDistribution = BTreeMap<String, usize>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermSummary {
    pub term: String,
    pub course_count: usize,
    pub credits: i64,
    /// Credit-weighted GPA rounded to two places; `None` for a zero-credit term.
    pub average_grade: Option<f64>,
    pub grade_distribution: GradeDistribution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicSummary {
    pub total_semesters: usize,
    pub total_courses: usize,
    pub total_credits: i64,
    pub average_grade: Option<f64>,
    pub grade_distribution: GradeDistribution,
    pub semester_breakdown: BTreeMap<String, TermSummary>,
}

/// Every projection of one raw result, plus the reason it is empty when the
/// input could not be read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOverview {
    pub student_info: StudentProfile,
    pub degrees: Vec<Degree>,
    pub enrolled_courses: Vec<EnrolledCourse>,
    pub past_semesters: PastSemesterMap,
    pub past_semester_summary: AcademicSummary,
    pub similar_students: Vec<SimilarStudent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodStats {
    pub sessions: usize,
    pub total_effectiveness: f64,
    pub average_effectiveness: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStats {
    pub sessions: usize,
    pub total_time: f64,
    pub average_time: f64,
}

/// Engagement statistics over a set of study sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_time_spent: f64,
    pub average_session_duration: Option<f64>,
    pub average_effectiveness: Option<f64>,
    pub unique_locations: usize,
    pub unique_methods: usize,
    pub group_study_sessions: usize,
    pub effectiveness_by_method: BTreeMap<String, MethodStats>,
    pub time_by_location: BTreeMap<String, LocationStats>,
    pub sessions_by_month: BTreeMap<u32, usize>,
    pub study_methods: Vec<String>,
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermStats {
    pub term: String,
    #[serde(flatten)]
    pub sessions: SessionStats,
    pub gpa: TermSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyHabits {
    pub current_term: Option<TermStats>,
    pub past_terms: BTreeMap<String, TermStats>,
    pub overall_stats: SessionStats,
}

/// Independently tracked slices of the per-student cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    RawData,
    PerformanceData,
    StudyHabitsData,
    AiInsights,
    CourseRoadmap,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::RawData,
        Category::PerformanceData,
        Category::StudyHabitsData,
        Category::AiInsights,
        Category::CourseRoadmap,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawData => write!(f, "raw data"),
            Self::PerformanceData => write!(f, "performance data"),
            Self::StudyHabitsData => write!(f, "study habits data"),
            Self::AiInsights => write!(f, "AI insights"),
            Self::CourseRoadmap => write!(f, "course roadmap"),
        }
    }
}

/// One value per [`Category`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFlags<T> {
    pub raw_data: T,
    pub performance_data: T,
    pub study_habits_data: T,
    pub ai_insights: T,
    pub course_roadmap: T,
}

impl<T> CategoryFlags<T> {
    pub fn get(&self, category: Category) -> &T {
        match category {
            Category::RawData => &self.raw_data,
            Category::PerformanceData => &self.performance_data,
            Category::StudyHabitsData => &self.study_habits_data,
            Category::AiInsights => &self.ai_insights,
            Category::CourseRoadmap => &self.course_roadmap,
        }
    }

    pub fn set(&mut self, category: Category, value: T) {
        let slot = match category {
            Category::RawData => &mut self.raw_data,
            Category::PerformanceData => &mut self.performance_data,
            Category::StudyHabitsData => &mut self.study_habits_data,
            Category::AiInsights => &mut self.ai_insights,
            Category::CourseRoadmap => &mut self.course_roadmap,
        };
        *slot = value;
    }
}

pub type LoadingFlags = CategoryFlags<bool>;
pub type ErrorFlags = CategoryFlags<Option<String>>;
