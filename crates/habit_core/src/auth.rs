use tokio::sync::watch;

use crate::habit::UserId;

/// Source of the signed-in identity. Login and logout happen elsewhere; the
/// core only reads who is signed in and reacts when that changes.
pub trait CredentialProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;

    /// Yields the new identity (or `None`) after every sign-in or sign-out.
    fn watch(&self) -> watch::Receiver<Option<UserId>>;
}

/// Identity holder driven by whatever performs authentication.
#[derive(Debug)]
pub struct AuthState {
    sender: watch::Sender<Option<UserId>>,
}

impl AuthState {
    pub fn signed_out() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub fn signed_in(user: UserId) -> Self {
        let (sender, _) = watch::channel(Some(user));
        Self { sender }
    }

    pub fn sign_in(&self, user: UserId) {
        tracing::info!(user = %user, "auth state changed: signed in");
        self.sender.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        tracing::info!("auth state changed: signed out");
        self.sender.send_replace(None);
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::signed_out()
    }
}

impl CredentialProvider for AuthState {
    fn current_user(&self) -> Option<UserId> {
        self.sender.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.sender.subscribe()
    }
}
