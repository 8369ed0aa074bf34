//! Teacher notifications
//!
//! Each teacher has one list, newest first, capped by the repository.

use crate::database::{Notification, Repository};
use crate::error::Result;

#[derive(Clone)]
pub struct NotificationsService {
    repo: Repository,
}

impl NotificationsService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn notify(
        &self,
        teacher_email: &str,
        title: &str,
        message: &str,
        course_id: Option<&str>,
    ) -> Result<Notification> {
        let notification = Notification::new(title, message, course_id);
        self.repo.push_notification(teacher_email, notification).await
    }

    pub async fn list(&self, teacher_email: &str) -> Result<Vec<Notification>> {
        if teacher_email.is_empty() {
            return Ok(Vec::new());
        }
        self.repo.notifications_for(teacher_email).await
    }

    pub async fn mark_read(&self, teacher_email: &str, id: &str) -> Result<bool> {
        self.repo.mark_notification_read(teacher_email, id).await
    }

    pub async fn delete(&self, teacher_email: &str, id: &str) -> Result<bool> {
        self.repo.remove_notification(teacher_email, id).await
    }

    pub async fn unread_count(&self, teacher_email: &str) -> Result<usize> {
        let list = self.list(teacher_email).await?;
        Ok(list.iter().filter(|n| !n.read).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn create_test_service() -> NotificationsService {
        NotificationsService::new(Repository::new(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_notify_and_mark_read() {
        let service = create_test_service();

        let first = service.notify("t@x.com", "One", "first", Some("c1")).await.unwrap();
        service.notify("t@x.com", "Two", "second", None).await.unwrap();

        let list = service.list("t@x.com").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title, "Two");
        assert_eq!(service.unread_count("t@x.com").await.unwrap(), 2);

        assert!(service.mark_read("t@x.com", &first.id).await.unwrap());
        assert_eq!(service.unread_count("t@x.com").await.unwrap(), 1);

        assert!(!service.mark_read("t@x.com", "missing").await.unwrap());
        assert!(!service.mark_read("other@x.com", &first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let service = create_test_service();
        let n = service.notify("t@x.com", "One", "first", None).await.unwrap();

        assert!(service.delete("t@x.com", &n.id).await.unwrap());
        assert!(!service.delete("t@x.com", &n.id).await.unwrap());
        assert!(service.list("t@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists_are_per_teacher() {
        let service = create_test_service();
        service.notify("a@x.com", "A", "", None).await.unwrap();

        assert!(service.list("b@x.com").await.unwrap().is_empty());
        assert!(service.list("").await.unwrap().is_empty());
        assert_eq!(service.unread_count("b@x.com").await.unwrap(), 0);
    }
}
