//! Verification mail dispatch seam.
//!
//! The registration workflow never talks to a mailer; it returns a dispatch
//! description and the HTTP handler hands it here, fire-and-forget. A failed
//! send never rolls back the created user; the user can request a re-send.

use anyhow::Result;
use tracing::info;

#[derive(Clone, Debug)]
pub struct VerificationMail {
    pub to: String,
    pub subject: String,
    /// Absolute confirmation link containing the selector/token pair.
    pub link: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, mail: &VerificationMail) -> Result<()>;
}

/// Logs instead of sending; the default until a transport is wired in.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: &VerificationMail) -> Result<()> {
        info!(
            to = %mail.to,
            subject = %mail.subject,
            link = %mail.link,
            "verification mail (log transport)"
        );
        Ok(())
    }
}
