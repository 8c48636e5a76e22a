use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use hearth_http::protocol::SendError;
use hearth_http::request::Request;
use hearth_http::response::Response;
use tracing::debug;

/// Verdict of an [`Authorizer`] on a request without a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// Authenticated, a session is created and the route handler runs.
    AllowedContinue,
    /// Wrong credentials. The middleware answers 401 unless the authorizer did.
    Denied,
    /// The client did not offer a usable scheme, [`Authorizer::negotiate`] answers.
    /// The authorizer must not conclude the response itself in this case.
    Negotiate,
    /// Authenticated, a session is created but the route handler does not run.
    AllowedButStop,
    /// The credentials were malformed. The middleware answers 400 unless the
    /// authorizer did.
    BadRequest,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// The protection space announced to clients.
    fn realm(&self) -> &str;

    /// Tells the client how to authenticate, typically with a `WWW-Authenticate`
    /// challenge, and concludes the response.
    async fn negotiate(&self, req: &mut Request, res: &mut Response) -> Result<(), SendError>;

    async fn try_authorize(&self, req: &mut Request, res: &mut Response) -> Result<AuthResult, SendError>;
}

type CredentialCheck = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// HTTP Basic authentication.
///
/// Credentials are handed to the check as user and password. Any failure to decode
/// the `Authorization` field is answered with 400 right away.
pub struct BasicAuthorizer {
    realm: String,
    check: CredentialCheck,
}

impl fmt::Debug for BasicAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthorizer").field("realm", &self.realm).finish_non_exhaustive()
    }
}

impl BasicAuthorizer {
    pub fn new(realm: impl Into<String>, check: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self { realm: realm.into(), check: Box::new(check) }
    }

    /// Splits an `Authorization` value into user and password.
    ///
    /// `Ok(None)` means the scheme is not Basic, `Err` carries the reason the value is
    /// malformed.
    pub fn decode(authorization: &str) -> Result<Option<(String, String)>, &'static str> {
        let Some((scheme, encoded)) = authorization.split_once(' ') else {
            return Err("Authorization header field is malformed");
        };
        if encoded.is_empty() {
            return Err("Authorization header field is malformed");
        }
        if scheme != "Basic" {
            return Ok(None);
        }

        let decoded = BASE64_STANDARD.decode(encoded.trim()).ok().ok_or("Invalid base64 in Authorization")?;
        let decoded = String::from_utf8(decoded).ok().ok_or("Decoded credentials are not valid UTF-8")?;
        let Some((user, password)) = decoded.split_once(':') else {
            return Err("Decoded base64 does not contain colon - empty passwords still need it");
        };
        Ok(Some((user.to_owned(), password.to_owned())))
    }
}

#[async_trait]
impl Authorizer for BasicAuthorizer {
    fn realm(&self) -> &str {
        &self.realm
    }

    async fn negotiate(&self, _req: &mut Request, res: &mut Response) -> Result<(), SendError> {
        res.append("WWW-Authenticate", format!("Basic realm=\"{}\", charset=\"UTF-8\"", self.realm));
        res.status(401).end().await
    }

    async fn try_authorize(&self, req: &mut Request, res: &mut Response) -> Result<AuthResult, SendError> {
        let Some(authorization) = req.field("Authorization") else {
            return Ok(AuthResult::Negotiate);
        };

        match Self::decode(authorization) {
            Ok(Some((user, password))) => {
                if (self.check)(&user, &password) {
                    debug!(user = %user, realm = %self.realm, "basic authentication accepted");
                    Ok(AuthResult::AllowedContinue)
                } else {
                    debug!(user = %user, realm = %self.realm, "basic authentication refused");
                    res.status(401).end().await?;
                    Ok(AuthResult::Denied)
                }
            }
            Ok(None) => Ok(AuthResult::Negotiate),
            Err(reason) => {
                res.status(400).send(reason).await?;
                Ok(AuthResult::BadRequest)
            }
        }
    }
}
