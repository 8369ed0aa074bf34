//! Engagement service
//!
//! Enrollment, comments and ratings. Enrollments and new comments notify
//! the teacher who owns the course; the record and its notification are
//! written together or not at all.

use crate::config::{MAX_RATING, MIN_RATING};
use crate::database::{
    generate_id, Comment, Course, CourseAccess, Enrollment, Notification, Repository, User,
};
use crate::error::{AppError, Result};
use chrono::Utc;
use std::collections::BTreeMap;

const ENROLL_NOTIFICATION_TITLE: &str = "New access to your course";
const COMMENT_NOTIFICATION_TITLE: &str = "New comment on your course";

/// Round to one decimal place
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Display form of an average rating, always one decimal ("4.0")
pub fn format_rating(value: f64) -> String {
    format!("{:.1}", value)
}

/// Whether `actor` may edit or delete `comment`: its author or an admin
pub fn can_modify_comment(actor: &User, comment: &Comment) -> bool {
    actor.is_admin() || comment.author_email.as_deref() == Some(actor.email.as_str())
}

#[derive(Clone)]
pub struct EngagementService {
    repo: Repository,
}

impl EngagementService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    // ===== Enrollment =====

    /// Enroll a student. Returns false if either argument is empty or
    /// the student is already enrolled.
    pub async fn enroll(&self, student_email: &str, course_id: &str) -> Result<bool> {
        if student_email.is_empty() || course_id.is_empty() {
            return Ok(false);
        }

        let name = self.display_name(student_email).await?;
        let inserted = self
            .repo
            .insert_enrollment_and_notify(student_email, course_id, |course| {
                let message = format!(
                    "{} ({}) accessed your course \"{}\"",
                    name, student_email, course.title
                );
                Notification::new(ENROLL_NOTIFICATION_TITLE, message, Some(course_id))
            })
            .await?;

        if inserted {
            tracing::info!("{} enrolled in course {}", student_email, course_id);
        } else {
            tracing::debug!("{} already enrolled in {}", student_email, course_id);
        }
        Ok(inserted)
    }

    pub async fn enrollments(&self, student_email: &str) -> Result<Vec<Enrollment>> {
        if student_email.is_empty() {
            return Ok(Vec::new());
        }
        self.repo.enrollments_for(student_email).await
    }

    pub async fn enrolled_course_ids(&self, student_email: &str) -> Result<Vec<String>> {
        let entries = self.enrollments(student_email).await?;
        Ok(entries.into_iter().map(|e| e.course_id).collect())
    }

    /// Courses the student is enrolled in that still exist
    pub async fn enrolled_courses(&self, student_email: &str) -> Result<Vec<Course>> {
        let ids = self.enrolled_course_ids(student_email).await?;
        let courses = self.repo.list_courses().await?;

        let mut enrolled = Vec::with_capacity(ids.len());
        for id in ids {
            match courses.iter().find(|c| c.id == id) {
                Some(course) => enrolled.push(course.clone()),
                None => tracing::warn!("Skipping enrollment in missing course {}", id),
            }
        }
        Ok(enrolled)
    }

    /// Students who accessed a course and when, for the teacher's report
    pub async fn course_access(&self, course_id: &str) -> Result<Vec<CourseAccess>> {
        let all = self.repo.all_enrollments().await?;

        Ok(all
            .into_iter()
            .flat_map(|(student_email, entries)| {
                entries
                    .into_iter()
                    .filter(|e| e.course_id == course_id)
                    .map(move |e| CourseAccess {
                        student_email: student_email.clone(),
                        access_time: e.access_time,
                    })
            })
            .collect())
    }

    // ===== Comments =====

    pub async fn add_comment(&self, course_id: &str, author: &User, text: &str) -> Result<Comment> {
        if course_id.is_empty() {
            return Err(AppError::validation("Course is required"));
        }
        if author.full_name.trim().is_empty() {
            return Err(AppError::validation("Comment author is required"));
        }
        if text.trim().is_empty() {
            return Err(AppError::validation("Comment text is required"));
        }

        let comment = Comment {
            id: generate_id(),
            course_id: course_id.to_string(),
            author: author.full_name.clone(),
            author_email: Some(author.email.clone()),
            author_avatar: author.profile_image.clone(),
            text: text.to_string(),
            date: Utc::now(),
            edited: false,
            edit_date: None,
        };
        let comment = self
            .repo
            .insert_comment_and_notify(comment, |course| {
                let message = format!(
                    "{} ({}) commented on your course \"{}\"",
                    author.full_name, author.email, course.title
                );
                Notification::new(COMMENT_NOTIFICATION_TITLE, message, Some(course_id))
            })
            .await?;

        tracing::info!("{} commented on course {}", author.email, course_id);
        Ok(comment)
    }

    pub async fn comments_for_course(&self, course_id: &str) -> Result<Vec<Comment>> {
        if course_id.is_empty() {
            return Ok(Vec::new());
        }
        self.repo.comments_for_course(course_id).await
    }

    pub async fn get_comment(&self, id: &str) -> Result<Option<Comment>> {
        self.repo.find_comment(id).await
    }

    /// Replace a comment's text. Only its author or an admin may do so.
    pub async fn update_comment(&self, actor: &User, id: &str, text: &str) -> Result<Option<Comment>> {
        if text.trim().is_empty() {
            return Err(AppError::validation("Comment text is required"));
        }

        let Some(comment) = self.repo.find_comment(id).await? else {
            return Ok(None);
        };
        if !can_modify_comment(actor, &comment) {
            return Err(AppError::unauthorized("only the author or an admin can edit this comment"));
        }

        self.repo.update_comment_text(id, text).await
    }

    /// Delete a comment. Only its author or an admin may do so; a
    /// missing comment yields `Ok(false)`.
    pub async fn delete_comment(&self, actor: &User, id: &str) -> Result<bool> {
        let Some(comment) = self.repo.find_comment(id).await? else {
            return Ok(false);
        };
        if !can_modify_comment(actor, &comment) {
            return Err(AppError::unauthorized("only the author or an admin can delete this comment"));
        }

        let removed = self.repo.remove_comment(id).await?;
        tracing::info!("{} deleted comment {}", actor.email, id);
        Ok(removed)
    }

    // ===== Ratings =====

    pub async fn rate_course(&self, course_id: &str, student_email: &str, rating: u8) -> Result<()> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(AppError::validation(format!(
                "Rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }
        if course_id.is_empty() || student_email.is_empty() {
            return Err(AppError::validation("Course and student are required"));
        }

        self.repo.upsert_rating(course_id, student_email, rating).await
    }

    /// The student's rating for the course, 0 if none
    pub async fn user_rating(&self, course_id: &str, student_email: &str) -> Result<u8> {
        let ratings = self.repo.ratings_for_course(course_id).await?;
        Ok(ratings.get(student_email).copied().unwrap_or(0))
    }

    /// Mean rating rounded to one decimal; 0.0 when unrated
    pub async fn average_rating(&self, course_id: &str) -> Result<f64> {
        let ratings = self.repo.ratings_for_course(course_id).await?;
        if ratings.is_empty() {
            return Ok(0.0);
        }

        let sum: u32 = ratings.values().map(|&r| u32::from(r)).sum();
        Ok(round_rating(f64::from(sum) / ratings.len() as f64))
    }

    pub async fn rating_count(&self, course_id: &str) -> Result<usize> {
        Ok(self.repo.ratings_for_course(course_id).await?.len())
    }

    pub async fn ratings_for_course(&self, course_id: &str) -> Result<BTreeMap<String, u8>> {
        self.repo.ratings_for_course(course_id).await
    }

    async fn display_name(&self, email: &str) -> Result<String> {
        Ok(self
            .repo
            .find_user(email)
            .await?
            .map(|u| u.full_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| email.to_string()))
    }
}
