//! Account management for administrators.

use reqwest::Method;
use std::sync::Arc;

use super::session::NO_BODY;
use super::{Failure, SessionManager};
use crate::db::{UpdateUserStatusRequest, UserResponse, UserStatus};

pub struct AdminClient {
    session: Arc<SessionManager>,
}

impl AdminClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub async fn users(&self) -> Result<Vec<UserResponse>, Failure> {
        self.session.get_authorized("/api/auth/users").await
    }

    pub async fn set_user_status(
        &self,
        user_id: &str,
        status: UserStatus,
    ) -> Result<UserResponse, Failure> {
        let body = UpdateUserStatusRequest {
            status: status.as_str().to_string(),
        };
        self.session
            .mutate(
                Method::PATCH,
                &format!("/api/auth/users/{}/status", user_id),
                Some(&body),
                true,
            )
            .await
    }

    /// Remove an account that holds no active bookings
    pub async fn delete_user(&self, user_id: &str) -> Result<(), Failure> {
        self.session
            .mutate(
                Method::DELETE,
                &format!("/api/auth/users/{}", user_id),
                NO_BODY,
                true,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{spawn_server, test_state, ADMIN_EMAIL, ADMIN_PASSWORD};
    use crate::client::{ApiClient, MemoryTokenStore};
    use crate::db::{RegisterRequest, Role};

    fn session(base_url: &str) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            ApiClient::new(base_url).unwrap(),
            Arc::new(MemoryTokenStore::default()),
        ))
    }

    #[tokio::test]
    async fn test_admin_manages_accounts() {
        let base_url = spawn_server(test_state().await).await;

        let customer = session(&base_url);
        let registered = customer
            .register(&RegisterRequest {
                name: "Grace Hopper".to_string(),
                email: "grace@example.com".to_string(),
                password: "cobol1959".to_string(),
                phone: None,
            })
            .await
            .unwrap();

        let admin_session = session(&base_url);
        let admin_user = admin_session.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
        assert_eq!(admin_user.role, Role::Admin);
        let admin = AdminClient::new(admin_session);

        let users = admin.users().await.unwrap();
        assert_eq!(users.len(), 2);

        let updated = admin
            .set_user_status(&registered.id, UserStatus::Inactive)
            .await
            .unwrap();
        assert_eq!(updated.status, UserStatus::Inactive);

        assert!(matches!(
            admin.set_user_status(&admin_user.id, UserStatus::Inactive).await,
            Err(Failure::Validation { .. })
        ));

        admin.delete_user(&registered.id).await.unwrap();
        assert_eq!(admin.users().await.unwrap().len(), 1);
        assert!(matches!(
            admin.delete_user(&registered.id).await,
            Err(Failure::NotFound(_))
        ));

        // The deleted account's session no longer resolves
        assert!(customer.current_identity().await.is_err());
        assert!(customer.snapshot().identity().is_none());
    }

    #[tokio::test]
    async fn test_customers_cannot_manage_accounts() {
        let base_url = spawn_server(test_state().await).await;
        let customer = session(&base_url);
        customer
            .register(&RegisterRequest {
                name: "Grace Hopper".to_string(),
                email: "grace@example.com".to_string(),
                password: "cobol1959".to_string(),
                phone: None,
            })
            .await
            .unwrap();

        let admin = AdminClient::new(customer);
        assert!(matches!(admin.users().await, Err(Failure::Authorization(_))));
    }

    #[tokio::test]
    async fn test_anonymous_admin_calls_need_login() {
        let base_url = spawn_server(test_state().await).await;
        let admin = AdminClient::new(session(&base_url));
        assert!(matches!(admin.users().await, Err(Failure::Authentication(_))));
    }
}
