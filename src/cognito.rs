//! Cognito-backed login accounts.
//!
//! Our Cognito usernames are the app's user ids, so deleting "the account
//! for user X" is a single `AdminDeleteUser` call.

use anyhow::Result;
use async_trait::async_trait;

use crate::deletion::{AccountRemoval, IdentityService};

pub struct CognitoIdentity {
    client: aws_sdk_cognitoidentityprovider::Client,
    user_pool_id: String,
}

impl CognitoIdentity {
    pub fn new(client: aws_sdk_cognitoidentityprovider::Client, user_pool_id: String) -> Self {
        CognitoIdentity {
            client,
            user_pool_id,
        }
    }
}

#[async_trait]
impl IdentityService for CognitoIdentity {
    async fn delete_account(&self, user_id: &str) -> Result<AccountRemoval> {
        let result = self
            .client
            .admin_delete_user()
            .user_pool_id(&self.user_pool_id)
            .username(user_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(AccountRemoval::Deleted),

            Err(e) => {
                if e.as_service_error()
                    .is_some_and(|se| se.is_user_not_found_exception())
                {
                    Ok(AccountRemoval::NotFound)
                } else {
                    Err(e.into())
                }
            }
        }
    }
}
