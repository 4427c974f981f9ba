//! Request builders for the dashboard's business endpoints.
//!
//! Payloads are opaque JSON; these helpers only know paths, methods and
//! filters. Everything they build goes through `AuthClient`, so it is
//! retried across a token refresh like any other call.

use serde_json::{json, Value};

use super::ApiRequest;

pub type Id = i64;

/// A REST collection with the standard list/get/create/update/delete routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Courses,
    Lessons,
    Materials,
    Assignments,
    Submissions,
    Tests,
    Questions,
    Answers,
    TestResults,
    Attendance,
    Notifications,
}

impl Resource {
    pub const ALL: [Resource; 11] = [
        Resource::Courses,
        Resource::Lessons,
        Resource::Materials,
        Resource::Assignments,
        Resource::Submissions,
        Resource::Tests,
        Resource::Questions,
        Resource::Answers,
        Resource::TestResults,
        Resource::Attendance,
        Resource::Notifications,
    ];

    pub fn collection(&self) -> &'static str {
        match self {
            Resource::Courses => "courses/",
            Resource::Lessons => "lessons/",
            Resource::Materials => "materials/",
            Resource::Assignments => "assignments/",
            Resource::Submissions => "submissions/",
            Resource::Tests => "tests/",
            Resource::Questions => "questions/",
            Resource::Answers => "answers/",
            Resource::TestResults => "test-results/",
            Resource::Attendance => "attendance/",
            Resource::Notifications => "notifications/",
        }
    }

    /// Parse a collection name as typed on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim_matches('/').replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|r| r.collection().trim_end_matches('/') == wanted)
    }

    pub fn item(&self, id: Id) -> String {
        format!("{}{}/", self.collection(), id)
    }

    pub fn list(&self) -> ApiRequest {
        ApiRequest::get(self.collection())
    }

    pub fn get(&self, id: Id) -> ApiRequest {
        ApiRequest::get(self.item(id))
    }

    pub fn create(&self, body: Value) -> ApiRequest {
        ApiRequest::post(self.collection()).json(body)
    }

    pub fn update(&self, id: Id, body: Value) -> ApiRequest {
        ApiRequest::put(self.item(id)).json(body)
    }

    pub fn delete(&self, id: Id) -> ApiRequest {
        ApiRequest::delete(self.item(id))
    }
}

/// Optional filters shared by the course-scoped collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub course_id: Option<Id>,
    pub lesson_id: Option<Id>,
    pub assignment_id: Option<Id>,
    pub test_id: Option<Id>,
    pub question_id: Option<Id>,
    pub student_id: Option<Id>,
    pub date: Option<String>,
}

impl Filter {
    pub fn course(course_id: Id) -> Self {
        Self {
            course_id: Some(course_id),
            ..Self::default()
        }
    }

    pub fn lesson(lesson_id: Id) -> Self {
        Self {
            lesson_id: Some(lesson_id),
            ..Self::default()
        }
    }

    fn apply(&self, request: ApiRequest) -> ApiRequest {
        request
            .query_opt("course_id", self.course_id)
            .query_opt("lesson_id", self.lesson_id)
            .query_opt("assignment_id", self.assignment_id)
            .query_opt("test_id", self.test_id)
            .query_opt("question_id", self.question_id)
            .query_opt("student_id", self.student_id)
            .query_opt("date", self.date.as_deref())
    }
}

/// List a collection with filters applied as query parameters.
pub fn list_filtered(resource: Resource, filter: &Filter) -> ApiRequest {
    filter.apply(resource.list())
}

// ===== Collection-specific actions =====

pub fn my_courses() -> ApiRequest {
    ApiRequest::get("courses/my_courses/")
}

pub fn enroll_students(course_id: Id, student_ids: &[Id]) -> ApiRequest {
    ApiRequest::post(format!("courses/{}/enroll_students/", course_id))
        .json(json!({ "student_ids": student_ids }))
}

pub fn remove_students(course_id: Id, student_ids: &[Id]) -> ApiRequest {
    ApiRequest::post(format!("courses/{}/remove_students/", course_id))
        .json(json!({ "student_ids": student_ids }))
}

pub fn grade_submission(submission_id: Id, score: f64, feedback: &str) -> ApiRequest {
    ApiRequest::post(format!("submissions/{}/grade/", submission_id))
        .json(json!({ "score": score, "feedback": feedback }))
}

/// Record attendance for one lesson on one date.
pub fn mark_attendance(lesson_id: Id, date: &str, attendance: Value) -> ApiRequest {
    ApiRequest::post("attendance/mark_attendance/").json(json!({
        "lesson_id": lesson_id,
        "date": date,
        "attendance": attendance,
    }))
}

pub fn my_profile() -> ApiRequest {
    ApiRequest::get("profiles/my_profile/")
}

pub fn update_profile(body: Value) -> ApiRequest {
    ApiRequest::patch("profiles/my_profile/").json(body)
}

pub fn my_settings() -> ApiRequest {
    ApiRequest::get("settings/my_settings/")
}

pub fn update_settings(body: Value) -> ApiRequest {
    ApiRequest::put("settings/update_settings/").json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    #[test]
    fn test_resource_paths() {
        assert_eq!(Resource::TestResults.collection(), "test-results/");
        assert_eq!(Resource::Courses.item(12), "courses/12/");
        assert_eq!(Resource::Lessons.delete(3).method(), &Method::DELETE);
        assert_eq!(Resource::Lessons.update(3, json!({})).path(), "lessons/3/");
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Resource::from_name("courses"), Some(Resource::Courses));
        assert_eq!(Resource::from_name("test_results"), Some(Resource::TestResults));
        assert_eq!(Resource::from_name("/attendance/"), Some(Resource::Attendance));
        assert_eq!(Resource::from_name("grades"), None);
    }

    #[test]
    fn test_filters_become_query() {
        let filter = Filter {
            lesson_id: Some(5),
            student_id: Some(9),
            date: Some("2024-03-01".into()),
            ..Filter::default()
        };
        let req = list_filtered(Resource::Attendance, &filter);
        assert_eq!(
            req.query_params(),
            &[
                ("lesson_id".to_string(), "5".to_string()),
                ("student_id".to_string(), "9".to_string()),
                ("date".to_string(), "2024-03-01".to_string()),
            ]
        );

        assert!(list_filtered(Resource::Courses, &Filter::default())
            .query_params()
            .is_empty());
    }

    #[test]
    fn test_action_bodies() {
        let req = enroll_students(4, &[1, 2]);
        assert_eq!(req.path(), "courses/4/enroll_students/");
        assert_eq!(req.body().unwrap()["student_ids"], json!([1, 2]));

        let req = mark_attendance(7, "2024-03-01", json!([{"student": 1, "status": "present"}]));
        assert_eq!(req.body().unwrap()["lesson_id"], 7);
    }
}
