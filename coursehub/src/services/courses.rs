//! Courses service
//!
//! Course publication with embedded attachments, lookup, search,
//! update and deletion.

use crate::config::{OrphanPolicy, DEFAULT_COURSE_SUBJECT};
use crate::database::{
    generate_id, Course, CourseDocument, CourseDraft, CourseImage, CourseUpdate, Repository, User,
    UserType,
};
use crate::error::{AppError, Result};
use crate::storage::embed::embed_all;
use chrono::Utc;

#[derive(Clone)]
pub struct CoursesService {
    repo: Repository,
    orphan_policy: OrphanPolicy,
}

impl CoursesService {
    pub fn new(repo: Repository, orphan_policy: OrphanPolicy) -> Self {
        Self {
            repo,
            orphan_policy,
        }
    }

    /// Publish a course owned by `teacher`.
    ///
    /// The main image and every document are read and encoded together;
    /// the record is written only once all of them succeeded.
    pub async fn create_course(&self, teacher: &User, draft: CourseDraft) -> Result<Course> {
        if teacher.user_type != UserType::Teacher {
            return Err(AppError::unauthorized("only teachers can publish courses"));
        }

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("Course title is required"));
        }

        tracing::info!(
            "Creating course \"{}\" for {} ({} documents)",
            title,
            teacher.email,
            draft.documents.len()
        );

        // Encode the cover and the documents concurrently
        let (main_image, documents) = futures::try_join!(
            embed_all(draft.main_image.as_slice()),
            embed_all(&draft.documents)
        )?;

        let course = Course {
            id: generate_id(),
            title: title.to_string(),
            description: draft.description,
            main_image: main_image
                .into_iter()
                .next()
                .map(|image| CourseImage { url: image.url }),
            documents: documents
                .into_iter()
                .map(|doc| CourseDocument {
                    name: doc.name,
                    mime_type: doc.mime_type,
                    size: doc.size,
                    url: doc.url,
                })
                .collect(),
            teacher_id: teacher.id.clone(),
            teacher_name: teacher.full_name.clone(),
            teacher_email: teacher.email.clone(),
            date: Utc::now(),
            // Fall back when the teacher never filled in a subject
            subject: teacher
                .subject
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_COURSE_SUBJECT.to_string()),
        };

        let course = self.repo.insert_course(course).await?;

        tracing::info!("Course created successfully: {}", course.id);
        Ok(course)
    }

    pub async fn get_course(&self, id: &str) -> Result<Option<Course>> {
        self.repo.find_course(id).await
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        self.repo.list_courses().await
    }

    /// Case-insensitive title search; a blank query returns everything
    pub async fn search_courses(&self, query: &str) -> Result<Vec<Course>> {
        let all_courses = self.list_courses().await?;

        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() {
            return Ok(all_courses);
        }

        Ok(all_courses
            .into_iter()
            .filter(|course| course.title.to_lowercase().contains(&query_lower))
            .collect())
    }

    pub async fn courses_by_teacher(&self, teacher_email: &str) -> Result<Vec<Course>> {
        let all_courses = self.list_courses().await?;
        Ok(all_courses
            .into_iter()
            .filter(|course| course.teacher_email == teacher_email)
            .collect())
    }

    pub async fn course_count_by_teacher(&self, teacher_email: &str) -> Result<usize> {
        Ok(self.courses_by_teacher(teacher_email).await?.len())
    }

    /// Merge `update` into the course; the id is never changed
    pub async fn update_course(&self, id: &str, update: CourseUpdate) -> Result<Option<Course>> {
        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::validation("Course title is required"));
        }

        tracing::debug!("Updating course: {}", id);
        self.repo.update_course(id, update).await
    }

    /// Remove the course. Dependent records follow the orphan policy.
    pub async fn delete_course(&self, id: &str) -> Result<bool> {
        tracing::info!("Deleting course: {}", id);

        let removed = self.repo.remove_course(id).await?;

        // Comments, ratings and enrollments survive unless cascading
        if removed && self.orphan_policy == OrphanPolicy::Cascade {
            self.repo.purge_course_references(id).await?;
        }

        Ok(removed)
    }
}
