//! Repository layer for the record collections
//!
//! Every collection lives under one key of the backing `KeyValueStore`
//! as a single JSON document. Mutations are read-modify-write of the
//! whole collection and are serialized through one lock per repository.
//! Records are decoded one at a time, so a single bad entry is skipped
//! instead of emptying its collection.

use super::models::*;
use crate::config::{
    COMMENTS_KEY, COURSES_KEY, CURRENT_USER_KEY, ENROLLMENTS_KEY, ID_RANDOM_SUFFIX_LEN,
    MAX_NOTIFICATIONS_PER_TEACHER, NOTIFICATIONS_KEY, RATINGS_KEY, USERS_KEY,
};
use crate::error::Result;
use crate::storage::KeyValueStore;
use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Generate a record id: base-36 milliseconds followed by a short random
/// base-36 suffix. Unique enough for one client, not globally.
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_RANDOM_SUFFIX_LEN)
        .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap_or('0'))
        .collect();

    format!("{}{}", to_base36(millis), suffix)
}

/// Decode each element on its own, dropping the ones that do not fit `T`
fn decode_entries<T>(key: &str, values: Vec<Value>) -> Vec<T>
where
    T: DeserializeOwned,
{
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping malformed record in {}: {}", key, e);
                None
            }
        })
        .collect()
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(char::from_digit((value % 36) as u32, 36).unwrap_or('0'));
        value /= 36;
    }
    digits.iter().rev().collect()
}

/// Repository over the collection namespace
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
    notification_limit: usize,
}

impl Repository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
            notification_limit: MAX_NOTIFICATIONS_PER_TEACHER,
        }
    }

    pub fn with_notification_limit(mut self, limit: usize) -> Self {
        self.notification_limit = limit.max(1);
        self
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Load a collection. A missing or unparsable value yields the empty
    /// collection; only backend failures are errors.
    pub async fn load<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(T::default());
        };

        match serde_json::from_str::<Option<T>>(&raw) {
            Ok(value) => Ok(value.unwrap_or_default()),
            Err(e) => {
                tracing::warn!("Collection {} is malformed, treating as empty: {}", key, e);
                Ok(T::default())
            }
        }
    }

    /// Load a list collection record by record. Entries that do not
    /// decode are dropped with a warning; the rest survive.
    async fn load_list<T>(&self, key: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let values: Vec<Value> = self.load(key).await?;
        Ok(decode_entries(key, values))
    }

    /// Load an email-keyed collection of lists, record by record
    async fn load_grouped<T>(&self, key: &str) -> Result<BTreeMap<String, Vec<T>>>
    where
        T: DeserializeOwned,
    {
        let groups: BTreeMap<String, Value> = self.load(key).await?;

        Ok(groups
            .into_iter()
            .filter_map(|(owner, value)| match value {
                Value::Array(items) => Some((owner, decode_entries(key, items))),
                Value::Null => None,
                _ => {
                    tracing::warn!("Skipping malformed entry for {} in {}", owner, key);
                    None
                }
            })
            .collect())
    }

    /// Put a raw collection back the way it was before a failed operation
    async fn restore(&self, key: &str, previous: Option<String>) -> Result<()> {
        match previous {
            Some(raw) => self.store.set(key, &raw).await,
            None => self.store.remove(key).await,
        }
    }

    /// Overwrite a collection in one write
    pub async fn save<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json).await
    }

    // ===== Users =====

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.load_list(USERS_KEY).await
    }

    pub async fn find_user(&self, email: &str) -> Result<Option<User>> {
        let users = self.list_users().await?;
        Ok(users.into_iter().find(|u| u.email == email))
    }

    /// Exact, case-sensitive match on both fields
    pub async fn find_user_by_credentials(&self, email: &str, password: &str) -> Result<Option<User>> {
        let users = self.list_users().await?;
        Ok(users
            .into_iter()
            .find(|u| u.email == email && u.password == password))
    }

    /// Insert, or replace the record with the same email
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        let _guard = self.lock().await;
        self.upsert_user_locked(user).await
    }

    async fn upsert_user_locked(&self, user: &User) -> Result<()> {
        let mut users: Vec<User> = self.load_list(USERS_KEY).await?;

        match users.iter_mut().find(|u| u.email == user.email) {
            Some(existing) => *existing = user.clone(),
            None => users.push(user.clone()),
        }

        self.save(USERS_KEY, &users).await?;
        tracing::debug!("Upserted user: {}", user.email);
        Ok(())
    }

    pub async fn remove_user(&self, email: &str) -> Result<bool> {
        let _guard = self.lock().await;

        let mut users: Vec<User> = self.load_list(USERS_KEY).await?;
        let before = users.len();
        users.retain(|u| u.email != email);

        if users.len() == before {
            return Ok(false);
        }

        self.save(USERS_KEY, &users).await?;
        tracing::debug!("Removed user: {}", email);
        Ok(true)
    }

    /// Set the profile image on the stored user and, when that user is
    /// signed in, on the session copy as well
    pub async fn set_profile_image(&self, email: &str, image_url: &str) -> Result<bool> {
        let _guard = self.lock().await;

        let mut users: Vec<User> = self.load_list(USERS_KEY).await?;
        let Some(user) = users.iter_mut().find(|u| u.email == email) else {
            return Ok(false);
        };
        user.profile_image = Some(image_url.to_string());
        self.save(USERS_KEY, &users).await?;

        let session: Option<SessionUser> = self.load(CURRENT_USER_KEY).await?;
        if let Some(mut session) = session.filter(|s| s.user.email == email) {
            session.user.profile_image = Some(image_url.to_string());
            self.save(CURRENT_USER_KEY, &session).await?;
        }

        tracing::debug!("Updated profile image for: {}", email);
        Ok(true)
    }

    // ===== Session =====

    pub async fn current_session(&self) -> Result<Option<SessionUser>> {
        self.load(CURRENT_USER_KEY).await
    }

    /// Upsert the user and make it the current session in one step
    pub async fn save_session(&self, session: &SessionUser) -> Result<()> {
        let _guard = self.lock().await;
        self.upsert_user_locked(&session.user).await?;
        self.save(CURRENT_USER_KEY, session).await
    }

    pub async fn clear_session(&self) -> Result<()> {
        let _guard = self.lock().await;
        self.store.remove(CURRENT_USER_KEY).await
    }

    // ===== Courses =====

    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        self.load_list(COURSES_KEY).await
    }

    pub async fn find_course(&self, id: &str) -> Result<Option<Course>> {
        let courses = self.list_courses().await?;
        Ok(courses.into_iter().find(|c| c.id == id))
    }

    pub async fn insert_course(&self, course: Course) -> Result<Course> {
        let _guard = self.lock().await;

        let mut courses: Vec<Course> = self.load_list(COURSES_KEY).await?;
        courses.push(course.clone());
        self.save(COURSES_KEY, &courses).await?;

        tracing::debug!("Inserted course: {}", course.id);
        Ok(course)
    }

    /// Merge `update` into the stored course. The id never changes.
    pub async fn update_course(&self, id: &str, update: CourseUpdate) -> Result<Option<Course>> {
        let _guard = self.lock().await;

        let mut courses: Vec<Course> = self.load_list(COURSES_KEY).await?;
        let Some(course) = courses.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };

        if let Some(title) = update.title {
            course.title = title;
        }
        if let Some(description) = update.description {
            course.description = description;
        }
        if let Some(subject) = update.subject {
            course.subject = subject;
        }
        if let Some(main_image) = update.main_image {
            course.main_image = Some(main_image);
        }
        if let Some(documents) = update.documents {
            course.documents = documents;
        }

        let updated = course.clone();
        self.save(COURSES_KEY, &courses).await?;

        tracing::debug!("Updated course: {}", id);
        Ok(Some(updated))
    }

    pub async fn remove_course(&self, id: &str) -> Result<bool> {
        let _guard = self.lock().await;

        let mut courses: Vec<Course> = self.load_list(COURSES_KEY).await?;
        let before = courses.len();
        courses.retain(|c| c.id != id);

        if courses.len() == before {
            return Ok(false);
        }

        self.save(COURSES_KEY, &courses).await?;
        tracing::debug!("Removed course: {}", id);
        Ok(true)
    }

    // ===== Enrollments =====

    pub async fn all_enrollments(&self) -> Result<EnrollmentMap> {
        let stored: BTreeMap<String, Vec<StoredEnrollment>> = self.load_grouped(ENROLLMENTS_KEY).await?;
        let now = Utc::now();

        Ok(stored
            .into_iter()
            .map(|(email, entries)| {
                let entries = entries.into_iter().map(|e| e.normalize(now)).collect();
                (email, entries)
            })
            .collect())
    }

    pub async fn enrollments_for(&self, student_email: &str) -> Result<Vec<Enrollment>> {
        let mut all = self.all_enrollments().await?;
        Ok(all.remove(student_email).unwrap_or_default())
    }

    /// Enroll and notify the course owner as one operation. Returns false
    /// if the pair is already enrolled. If the notification cannot be
    /// written the enrollment is rolled back, so a retry enrolls and
    /// notifies again.
    pub async fn insert_enrollment_and_notify<F>(
        &self,
        student_email: &str,
        course_id: &str,
        notice: F,
    ) -> Result<bool>
    where
        F: FnOnce(&Course) -> Notification + Send,
    {
        let _guard = self.lock().await;
        let previous = self.store.get(ENROLLMENTS_KEY).await?;

        if !self.insert_enrollment_locked(student_email, course_id).await? {
            return Ok(false);
        }

        if let Err(e) = self.notify_owner_locked(course_id, notice).await {
            tracing::warn!(
                "Rolling back enrollment of {} in {}: {}",
                student_email,
                course_id,
                e
            );
            self.restore(ENROLLMENTS_KEY, previous).await?;
            return Err(e);
        }
        Ok(true)
    }

    async fn insert_enrollment_locked(&self, student_email: &str, course_id: &str) -> Result<bool> {
        let mut all = self.all_enrollments().await?;
        let entries = all.entry(student_email.to_string()).or_default();

        if entries.iter().any(|e| e.course_id == course_id) {
            return Ok(false);
        }

        entries.push(Enrollment {
            course_id: course_id.to_string(),
            access_time: Utc::now(),
        });
        self.save(ENROLLMENTS_KEY, &all).await?;

        tracing::debug!("Enrolled {} in course {}", student_email, course_id);
        Ok(true)
    }

    // ===== Comments =====

    pub async fn list_comments(&self) -> Result<Vec<Comment>> {
        self.load_list(COMMENTS_KEY).await
    }

    pub async fn comments_for_course(&self, course_id: &str) -> Result<Vec<Comment>> {
        let comments = self.list_comments().await?;
        Ok(comments
            .into_iter()
            .filter(|c| c.course_id == course_id)
            .collect())
    }

    pub async fn find_comment(&self, id: &str) -> Result<Option<Comment>> {
        let comments = self.list_comments().await?;
        Ok(comments.into_iter().find(|c| c.id == id))
    }

    /// Insert a comment and notify the course owner as one operation;
    /// the comment is rolled back if the notification write fails
    pub async fn insert_comment_and_notify<F>(&self, comment: Comment, notice: F) -> Result<Comment>
    where
        F: FnOnce(&Course) -> Notification + Send,
    {
        let _guard = self.lock().await;
        let previous = self.store.get(COMMENTS_KEY).await?;

        let comment = self.insert_comment_locked(comment).await?;

        if let Err(e) = self.notify_owner_locked(&comment.course_id, notice).await {
            tracing::warn!("Rolling back comment {}: {}", comment.id, e);
            self.restore(COMMENTS_KEY, previous).await?;
            return Err(e);
        }
        Ok(comment)
    }

    async fn insert_comment_locked(&self, comment: Comment) -> Result<Comment> {
        let mut comments: Vec<Comment> = self.load_list(COMMENTS_KEY).await?;
        comments.push(comment.clone());
        self.save(COMMENTS_KEY, &comments).await?;

        tracing::debug!("Inserted comment {} on course {}", comment.id, comment.course_id);
        Ok(comment)
    }

    /// Replace the text and mark the comment edited
    pub async fn update_comment_text(&self, id: &str, text: &str) -> Result<Option<Comment>> {
        let _guard = self.lock().await;

        let mut comments: Vec<Comment> = self.load_list(COMMENTS_KEY).await?;
        let Some(comment) = comments.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };

        comment.text = text.to_string();
        comment.edited = true;
        comment.edit_date = Some(Utc::now());

        let updated = comment.clone();
        self.save(COMMENTS_KEY, &comments).await?;

        tracing::debug!("Edited comment: {}", id);
        Ok(Some(updated))
    }

    /// Unconditional removal by id
    pub async fn remove_comment(&self, id: &str) -> Result<bool> {
        let _guard = self.lock().await;

        let mut comments: Vec<Comment> = self.load_list(COMMENTS_KEY).await?;
        let before = comments.len();
        comments.retain(|c| c.id != id);

        if comments.len() == before {
            return Ok(false);
        }

        self.save(COMMENTS_KEY, &comments).await?;
        tracing::debug!("Removed comment: {}", id);
        Ok(true)
    }

    // ===== Ratings =====

    pub async fn all_ratings(&self) -> Result<RatingMap> {
        let stored: BTreeMap<String, Value> = self.load(RATINGS_KEY).await?;

        Ok(stored
            .into_iter()
            .filter_map(|(course_id, value)| {
                let Value::Object(by_student) = value else {
                    tracing::warn!("Skipping malformed ratings for course {}", course_id);
                    return None;
                };

                let ratings = by_student
                    .into_iter()
                    .filter_map(|(email, value)| match serde_json::from_value::<u8>(value) {
                        Ok(rating) => Some((email, rating)),
                        Err(e) => {
                            tracing::warn!("Skipping rating by {} on {}: {}", email, course_id, e);
                            None
                        }
                    })
                    .collect();
                Some((course_id, ratings))
            })
            .collect())
    }

    pub async fn ratings_for_course(&self, course_id: &str) -> Result<BTreeMap<String, u8>> {
        let mut all = self.all_ratings().await?;
        Ok(all.remove(course_id).unwrap_or_default())
    }

    /// One rating per (course, student); a later call overwrites
    pub async fn upsert_rating(&self, course_id: &str, student_email: &str, rating: u8) -> Result<()> {
        let _guard = self.lock().await;

        let mut all = self.all_ratings().await?;
        all.entry(course_id.to_string())
            .or_default()
            .insert(student_email.to_string(), rating);
        self.save(RATINGS_KEY, &all).await?;

        tracing::debug!("{} rated course {}: {}", student_email, course_id, rating);
        Ok(())
    }

    // ===== Notifications =====

    pub async fn notifications_for(&self, teacher_email: &str) -> Result<Vec<Notification>> {
        let mut all: NotificationMap = self.load_grouped(NOTIFICATIONS_KEY).await?;
        Ok(all.remove(teacher_email).unwrap_or_default())
    }

    /// Prepend to the teacher's list and drop anything past the limit
    pub async fn push_notification(&self, teacher_email: &str, notification: Notification) -> Result<Notification> {
        let _guard = self.lock().await;
        self.push_notification_locked(teacher_email, notification).await
    }

    async fn push_notification_locked(&self, teacher_email: &str, notification: Notification) -> Result<Notification> {
        let mut all: NotificationMap = self.load_grouped(NOTIFICATIONS_KEY).await?;
        let list = all.entry(teacher_email.to_string()).or_default();
        list.insert(0, notification.clone());
        list.truncate(self.notification_limit);
        self.save(NOTIFICATIONS_KEY, &all).await?;

        tracing::debug!("Notified {}: {}", teacher_email, notification.title);
        Ok(notification)
    }

    /// Notify the teacher who owns `course_id`; a missing course is
    /// skipped rather than treated as an error
    async fn notify_owner_locked<F>(&self, course_id: &str, notice: F) -> Result<()>
    where
        F: FnOnce(&Course) -> Notification + Send,
    {
        let Some(course) = self.find_course(course_id).await? else {
            tracing::warn!("Course {} no longer exists, skipping notification", course_id);
            return Ok(());
        };

        let notification = notice(&course);
        self.push_notification_locked(&course.teacher_email, notification).await?;
        Ok(())
    }

    pub async fn mark_notification_read(&self, teacher_email: &str, id: &str) -> Result<bool> {
        let _guard = self.lock().await;

        let mut all: NotificationMap = self.load_grouped(NOTIFICATIONS_KEY).await?;
        let Some(notification) = all
            .get_mut(teacher_email)
            .and_then(|list| list.iter_mut().find(|n| n.id == id))
        else {
            return Ok(false);
        };

        notification.read = true;
        self.save(NOTIFICATIONS_KEY, &all).await?;
        Ok(true)
    }

    pub async fn remove_notification(&self, teacher_email: &str, id: &str) -> Result<bool> {
        let _guard = self.lock().await;

        let mut all: NotificationMap = self.load_grouped(NOTIFICATIONS_KEY).await?;
        let Some(list) = all.get_mut(teacher_email) else {
            return Ok(false);
        };

        let before = list.len();
        list.retain(|n| n.id != id);
        if list.len() == before {
            return Ok(false);
        }

        self.save(NOTIFICATIONS_KEY, &all).await?;
        Ok(true)
    }

    // ===== Cascade =====

    /// Remove comments, ratings, enrollments and notifications that
    /// reference `course_id`
    pub async fn purge_course_references(&self, course_id: &str) -> Result<()> {
        let _guard = self.lock().await;

        let mut comments: Vec<Comment> = self.load_list(COMMENTS_KEY).await?;
        comments.retain(|c| c.course_id != course_id);
        self.save(COMMENTS_KEY, &comments).await?;

        let mut ratings = self.all_ratings().await?;
        if ratings.remove(course_id).is_some() {
            self.save(RATINGS_KEY, &ratings).await?;
        }

        let mut enrollments = self.all_enrollments().await?;
        for entries in enrollments.values_mut() {
            entries.retain(|e| e.course_id != course_id);
        }
        self.save(ENROLLMENTS_KEY, &enrollments).await?;

        let mut notifications: NotificationMap = self.load_grouped(NOTIFICATIONS_KEY).await?;
        for list in notifications.values_mut() {
            list.retain(|n| n.course_id.as_deref() != Some(course_id));
        }
        self.save(NOTIFICATIONS_KEY, &notifications).await?;

        tracing::debug!("Purged records referencing course: {}", course_id);
        Ok(())
    }

    // ===== Legacy shapes =====

    /// Rewrite collections written by older clients into the current
    /// shape. Returns true if anything was rewritten.
    pub async fn migrate_legacy_shapes(&self) -> Result<bool> {
        let _guard = self.lock().await;
        let mut migrated = false;

        // Bare course ids become full enrollment entries
        let stored: BTreeMap<String, Vec<StoredEnrollment>> = self.load_grouped(ENROLLMENTS_KEY).await?;
        if stored.values().flatten().any(StoredEnrollment::is_legacy) {
            let normalized = self.all_enrollments().await?;
            self.save(ENROLLMENTS_KEY, &normalized).await?;
            tracing::info!("Migrated legacy enrollment entries");
            migrated = true;
        }

        // Numeric comment ids are rewritten as strings

        if let Some(raw) = self.store.get(COMMENTS_KEY).await? {
            if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
                if values.iter().any(|v| v.get("id").is_some_and(|id| id.is_number())) {
                    let comments: Vec<Comment> = self.load_list(COMMENTS_KEY).await?;
                    self.save(COMMENTS_KEY, &comments).await?;
                    tracing::info!("Migrated numeric comment ids");
                    migrated = true;
                }
            }
        }

        // Notifications written before ids existed get one
        let mut notifications: NotificationMap = self.load_grouped(NOTIFICATIONS_KEY).await?;
        let mut assigned = 0;
        for notification in notifications.values_mut().flatten() {
            if notification.id.is_empty() {
                notification.id = generate_id();
                assigned += 1;
            }
        }
        if assigned > 0 {
            self.save(NOTIFICATIONS_KEY, &notifications).await?;
            tracing::info!("Assigned ids to {} legacy notifications", assigned);
            migrated = true;
        }

        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn create_test_repo() -> (Repository, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Repository::new(store.clone()), store)
    }

    fn user(email: &str, user_type: UserType) -> User {
        User {
            id: Some(generate_id()),
            email: email.to_string(),
            password: "pw".to_string(),
            user_type,
            full_name: format!("User {}", email),
            profile_image: None,
            student_id: None,
            subject: None,
        }
    }

    fn course(id: &str, teacher_email: &str) -> Course {
        Course {
            id: id.to_string(),
            title: format!("Course {}", id),
            description: String::new(),
            main_image: None,
            documents: Vec::new(),
            teacher_id: None,
            teacher_name: "Teacher".to_string(),
            teacher_email: teacher_email.to_string(),
            date: Utc::now(),
            subject: "General".to_string(),
        }
    }

    fn notification(title: &str) -> Notification {
        Notification {
            id: generate_id(),
            title: title.to_string(),
            message: String::new(),
            course_id: None,
            date: Utc::now(),
            read: false,
        }
    }

    async fn enroll(repo: &Repository, student_email: &str, course_id: &str) -> bool {
        repo.insert_enrollment_and_notify(student_email, course_id, |c| {
            let mut note = notification("New access");
            note.course_id = Some(c.id.clone());
            note
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_generate_id_shape() {
        let a = generate_id();
        let b = generate_id();

        assert!(a.len() > ID_RANDOM_SUFFIX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let (repo, _store) = create_test_repo();
        assert!(repo.list_users().await.unwrap().is_empty());
        assert!(repo.current_session().await.unwrap().is_none());
        assert!(repo.all_ratings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_collection_is_empty() {
        let (repo, store) = create_test_repo();
        store.set(COURSES_KEY, "{not json").await.unwrap();
        store.set(CURRENT_USER_KEY, "null").await.unwrap();

        assert!(repo.list_courses().await.unwrap().is_empty());
        assert!(repo.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_record_does_not_empty_collection() {
        let (repo, store) = create_test_repo();
        let good = serde_json::to_value(course("c1", "t@x.com")).unwrap();
        let mut bad = serde_json::to_value(course("c2", "t@x.com")).unwrap();
        bad.as_object_mut().unwrap().remove("teacherEmail");
        store
            .set(COURSES_KEY, &serde_json::to_string(&vec![good, bad]).unwrap())
            .await
            .unwrap();

        let courses = repo.list_courses().await.unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, "c1");

        // The next write keeps the record that did decode
        repo.insert_course(course("c3", "t@x.com")).await.unwrap();
        let ids: Vec<String> = repo
            .list_courses()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[tokio::test]
    async fn test_bad_entries_skipped_in_keyed_collections() {
        let (repo, store) = create_test_repo();
        store
            .set(RATINGS_KEY, r#"{"c1":{"a@x.com":4,"b@x.com":"five"},"c2":7}"#)
            .await
            .unwrap();
        store
            .set(
                NOTIFICATIONS_KEY,
                r#"{"t@x.com":[{"id":"n1","title":"t","message":"m","date":"2024-05-01T12:00:00.000Z"},{"id":"n2"}],"u@x.com":"oops"}"#,
            )
            .await
            .unwrap();

        let ratings = repo.ratings_for_course("c1").await.unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings.get("a@x.com"), Some(&4));
        assert!(repo.ratings_for_course("c2").await.unwrap().is_empty());

        let list = repo.notifications_for("t@x.com").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "n1");
        assert!(repo.notifications_for("u@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_user_keeps_email_unique() {
        let (repo, _store) = create_test_repo();

        let mut first = user("a@x.com", UserType::Student);
        repo.upsert_user(&first).await.unwrap();

        first.full_name = "Renamed".to_string();
        repo.upsert_user(&first).await.unwrap();
        repo.upsert_user(&user("b@x.com", UserType::Teacher)).await.unwrap();

        let users = repo.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users.iter().filter(|u| u.email == "a@x.com").count(), 1);
        assert_eq!(repo.find_user("a@x.com").await.unwrap().unwrap().full_name, "Renamed");
    }

    #[tokio::test]
    async fn test_credentials_are_case_sensitive() {
        let (repo, _store) = create_test_repo();
        repo.upsert_user(&user("a@x.com", UserType::Student)).await.unwrap();

        assert!(repo.find_user_by_credentials("a@x.com", "pw").await.unwrap().is_some());
        assert!(repo.find_user_by_credentials("A@x.com", "pw").await.unwrap().is_none());
        assert!(repo.find_user_by_credentials("a@x.com", "PW").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_course_merges_fields() {
        let (repo, _store) = create_test_repo();
        repo.insert_course(course("c1", "t@x.com")).await.unwrap();

        let updated = repo
            .update_course(
                "c1",
                CourseUpdate {
                    title: Some("Renamed".to_string()),
                    ..CourseUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.id, "c1");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.teacher_email, "t@x.com");

        assert!(repo.update_course("nope", CourseUpdate::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_enrollment_is_idempotent() {
        let (repo, _store) = create_test_repo();
        repo.insert_course(course("c1", "t@x.com")).await.unwrap();

        assert!(enroll(&repo, "s@x.com", "c1").await);
        assert!(!enroll(&repo, "s@x.com", "c1").await);
        assert!(enroll(&repo, "s@x.com", "c2").await);

        let entries = repo.enrollments_for("s@x.com").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].course_id, "c1");

        // Only the existing course's owner is notified, and only once
        let list = repo.notifications_for("t@x.com").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].course_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_notifications_capped_newest_first() {
        let (repo, _store) = create_test_repo();

        for i in 0..MAX_NOTIFICATIONS_PER_TEACHER {
            repo.push_notification("t@x.com", notification(&format!("n{}", i)))
                .await
                .unwrap();
        }
        repo.push_notification("t@x.com", notification("newest")).await.unwrap();

        let list = repo.notifications_for("t@x.com").await.unwrap();
        assert_eq!(list.len(), MAX_NOTIFICATIONS_PER_TEACHER);
        assert_eq!(list[0].title, "newest");
        assert!(list.iter().all(|n| n.title != "n0"));
        assert_eq!(list.last().unwrap().title, "n1");
    }

    #[tokio::test]
    async fn test_custom_notification_limit() {
        let store = Arc::new(MemoryStore::new());
        let repo = Repository::new(store).with_notification_limit(2);

        for title in ["a", "b", "c"] {
            repo.push_notification("t@x.com", notification(title)).await.unwrap();
        }

        let titles: Vec<String> = repo
            .notifications_for("t@x.com")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(titles, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_profile_image_updates_session_copy() {
        let (repo, _store) = create_test_repo();
        let session = SessionUser {
            user: user("s@x.com", UserType::Student),
            remember_me: false,
        };
        repo.save_session(&session).await.unwrap();

        assert!(repo.set_profile_image("s@x.com", "data:image/png;base64,AA==").await.unwrap());

        let stored = repo.find_user("s@x.com").await.unwrap().unwrap();
        let current = repo.current_session().await.unwrap().unwrap();
        assert_eq!(stored.profile_image, current.user.profile_image);
        assert_eq!(stored.profile_image.as_deref(), Some("data:image/png;base64,AA=="));

        assert!(!repo.set_profile_image("nobody@x.com", "data:,").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_course_references() {
        let (repo, _store) = create_test_repo();
        enroll(&repo, "s@x.com", "c1").await;
        enroll(&repo, "s@x.com", "c2").await;
        repo.upsert_rating("c1", "s@x.com", 5).await.unwrap();
        let mut note = notification("about c1");
        note.course_id = Some("c1".to_string());
        repo.push_notification("t@x.com", note).await.unwrap();

        repo.purge_course_references("c1").await.unwrap();

        let entries = repo.enrollments_for("s@x.com").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].course_id, "c2");
        assert!(repo.ratings_for_course("c1").await.unwrap().is_empty());
        assert!(repo.notifications_for("t@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migrate_legacy_shapes() {
        let (repo, store) = create_test_repo();
        store
            .set(
                ENROLLMENTS_KEY,
                r#"{"s@x.com":["c1",{"courseId":"c2","accessTime":"2024-03-01T10:00:00.000Z"}]}"#,
            )
            .await
            .unwrap();
        store
            .set(
                COMMENTS_KEY,
                r#"[{"id":1714564800000,"courseId":"c1","author":"Sam","authorEmail":"s@x.com","text":"hi","date":"2024-05-01T12:00:00.000Z"}]"#,
            )
            .await
            .unwrap();
        store
            .set(
                NOTIFICATIONS_KEY,
                r#"{"t@x.com":[{"title":"t","message":"m","courseId":"c1","date":"2024-05-01T12:00:00.000Z","read":false}]}"#,
            )
            .await
            .unwrap();

        assert!(repo.migrate_legacy_shapes().await.unwrap());

        let raw = store.get(ENROLLMENTS_KEY).await.unwrap().unwrap();
        let stored: BTreeMap<String, Vec<StoredEnrollment>> = serde_json::from_str(&raw).unwrap();
        assert!(!stored.values().flatten().any(StoredEnrollment::is_legacy));

        let raw = store.get(COMMENTS_KEY).await.unwrap().unwrap();
        assert!(raw.contains(r#""id":"1714564800000""#));

        let notifications = repo.notifications_for("t@x.com").await.unwrap();
        assert!(!notifications[0].id.is_empty());

        // Second run has nothing to do
        assert!(!repo.migrate_legacy_shapes().await.unwrap());
    }
}
