//! Operator login, with optional mutual-TLS material.

use std::{fmt, sync::Arc};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    api::{HsmApi, LoginRequest, MutualTlsMaterial, StoreFile},
    session::{Route, Session},
};

/// Field missing from the login form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    Username,
    Password,
    KeyStore,
    KeyStorePassword,
    TrustStore,
    TrustStorePassword,
}

impl LoginField {
    pub fn requirement(&self) -> &'static str {
        match self {
            LoginField::Username => "Username is required.",
            LoginField::Password => "Password is required.",
            LoginField::KeyStore => "Client KeyStore file is required for SSL.",
            LoginField::KeyStorePassword => "Client KeyStore password is required.",
            LoginField::TrustStore => "TrustStore file is required for SSL.",
            LoginField::TrustStorePassword => "TrustStore password is required.",
        }
    }
}

impl fmt::Display for LoginField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.requirement())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("{0}")]
    Validation(LoginField),
    #[error("Login failed: {0}")]
    Failed(String),
}

/// Outcome of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    pub navigate_to: Route,
    pub message: Option<String>,
}

/// Values entered on the login form.
#[derive(Clone, Default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub key_store: Option<StoreFile>,
    pub key_store_password: String,
    pub trust_store: Option<StoreFile>,
    pub trust_store_password: String,
}

impl fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("use_ssl", &self.use_ssl)
            .field("key_store", &self.key_store)
            .field("trust_store", &self.trust_store)
            .finish_non_exhaustive()
    }
}

impl LoginForm {
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Checks the form in display order and builds the request to submit.
    pub fn validate(&self) -> Result<LoginRequest, LoginField> {
        if self.username.trim().is_empty() {
            return Err(LoginField::Username);
        }
        if self.password.is_empty() {
            return Err(LoginField::Password);
        }
        let mutual_tls = if self.use_ssl {
            let key_store = self.key_store.clone().ok_or(LoginField::KeyStore)?;
            if self.key_store_password.is_empty() {
                return Err(LoginField::KeyStorePassword);
            }
            let trust_store = self.trust_store.clone().ok_or(LoginField::TrustStore)?;
            if self.trust_store_password.is_empty() {
                return Err(LoginField::TrustStorePassword);
            }
            Some(MutualTlsMaterial {
                key_store,
                key_store_password: self.key_store_password.clone(),
                trust_store,
                trust_store_password: self.trust_store_password.clone(),
            })
        } else {
            None
        };
        Ok(LoginRequest {
            username: self.username.clone(),
            password: self.password.clone(),
            mutual_tls,
        })
    }

    /// Drops every secret. File selections stay so they need not be picked again.
    pub fn clear_secrets(&mut self) {
        self.password.clear();
        self.key_store_password.clear();
        self.trust_store_password.clear();
    }
}

pub struct AuthSession {
    api: Arc<dyn HsmApi>,
    session: Session,
    form: LoginForm,
}

impl AuthSession {
    pub fn new(api: Arc<dyn HsmApi>, session: Session) -> Self {
        Self {
            api,
            session,
            form: LoginForm::default(),
        }
    }

    pub fn with_form(mut self, form: LoginForm) -> Self {
        self.form = form;
        self
    }

    pub fn form(&self) -> &LoginForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut LoginForm {
        &mut self.form
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Validates the form and submits it as a single request.
    ///
    /// On success the shared session is marked authenticated. On a failed
    /// attempt the session flag is left untouched and all passwords are
    /// cleared from the form.
    pub async fn login(&mut self) -> Result<LoginSuccess, LoginError> {
        let request = self.form.validate().map_err(LoginError::Validation)?;
        let mutual_tls = request.mutual_tls.is_some();

        match self.api.login(&request).await {
            Ok(response) => {
                self.session.mark_authenticated();
                info!(username = %request.username, mutual_tls, "login succeeded");
                Ok(LoginSuccess {
                    navigate_to: Route::Dashboard,
                    message: response.message,
                })
            }
            Err(err) => {
                warn!(username = %request.username, mutual_tls, error = %err, "login failed");
                self.form.clear_secrets();
                let detail = err.detail().trim();
                Err(LoginError::Failed(if detail.is_empty() {
                    "Unknown error".to_string()
                } else {
                    detail.to_string()
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aggregator::tests::StubApi, ConsoleError};

    fn mtls_form() -> LoginForm {
        LoginForm {
            username: "operator".into(),
            password: "secret".into(),
            use_ssl: true,
            key_store: Some(StoreFile::new("client.p12", vec![0x30, 0x82])),
            key_store_password: "ks-pass".into(),
            trust_store: Some(StoreFile::new("truststore.jks", vec![0xfe, 0xed])),
            trust_store_password: "ts-pass".into(),
        }
    }

    #[test]
    fn validation_order_for_plain_login() {
        assert_eq!(
            LoginForm::plain("  ", "").validate().unwrap_err(),
            LoginField::Username
        );
        assert_eq!(
            LoginForm::plain("operator", "").validate().unwrap_err(),
            LoginField::Password
        );
        let request = LoginForm::plain("operator", " ").validate().unwrap();
        assert!(request.mutual_tls.is_none());
    }

    #[test]
    fn each_missing_tls_field_is_distinct() {
        let cases: [(fn(&mut LoginForm), LoginField); 4] = [
            (|f| f.key_store = None, LoginField::KeyStore),
            (|f| f.key_store_password.clear(), LoginField::KeyStorePassword),
            (|f| f.trust_store = None, LoginField::TrustStore),
            (|f| f.trust_store_password.clear(), LoginField::TrustStorePassword),
        ];
        for (strip, expected) in cases {
            let mut form = mtls_form();
            strip(&mut form);
            assert_eq!(form.validate().unwrap_err(), expected);
        }
        assert!(mtls_form().validate().unwrap().mutual_tls.is_some());
    }

    #[test]
    fn tls_material_ignored_when_ssl_disabled() {
        let mut form = mtls_form();
        form.use_ssl = false;
        form.trust_store_password.clear();
        assert!(form.validate().unwrap().mutual_tls.is_none());
    }

    #[tokio::test]
    async fn missing_truststore_password_sends_nothing() {
        let api = Arc::new(StubApi::default());
        let session = Session::new();
        let mut form = mtls_form();
        form.trust_store_password.clear();
        let mut auth = AuthSession::new(api.clone(), session.clone()).with_form(form);

        let err = auth.login().await.unwrap_err();
        assert_eq!(err, LoginError::Validation(LoginField::TrustStorePassword));
        assert_eq!(err.to_string(), "TrustStore password is required.");
        assert!(api.calls().is_empty());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn success_marks_session_and_navigates() {
        let api = Arc::new(StubApi::default());
        let session = Session::new();
        let mut auth = AuthSession::new(api.clone(), session.clone()).with_form(mtls_form());

        let success = auth.login().await.unwrap();
        assert_eq!(success.navigate_to, Route::Dashboard);
        assert!(session.is_authenticated());
        assert_eq!(session.guard(Route::Dashboard), Route::Dashboard);
        assert_eq!(api.calls(), vec!["login:operator:mtls"]);
        assert_eq!(auth.form().password, "secret");
    }

    #[tokio::test]
    async fn failure_clears_secrets_and_keeps_files() {
        let api = Arc::new(StubApi {
            login_result: Some(Err(ConsoleError::operation(401, "Authentication failed"))),
            ..StubApi::default()
        });
        let session = Session::new();
        let mut auth = AuthSession::new(api, session.clone()).with_form(mtls_form());

        let err = auth.login().await.unwrap_err();
        assert_eq!(err.to_string(), "Login failed: Authentication failed");
        assert!(!session.is_authenticated());

        let form = auth.form();
        assert!(form.password.is_empty());
        assert!(form.key_store_password.is_empty());
        assert!(form.trust_store_password.is_empty());
        assert_eq!(form.username, "operator");
        assert_eq!(form.key_store.as_ref().unwrap().file_name, "client.p12");
        assert!(form.trust_store.is_some());

        // a retry without re-entering secrets fails validation locally
        assert_eq!(
            auth.login().await.unwrap_err(),
            LoginError::Validation(LoginField::Password)
        );
    }

    #[tokio::test]
    async fn empty_error_detail_falls_back_to_generic_text() {
        let api = Arc::new(StubApi {
            login_result: Some(Err(ConsoleError::Transport(String::new()))),
            ..StubApi::default()
        });
        let mut auth = AuthSession::new(api, Session::new())
            .with_form(LoginForm::plain("operator", "secret"));
        assert_eq!(
            auth.login().await.unwrap_err(),
            LoginError::Failed("Unknown error".into())
        );
    }
}
