use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use driftboard_common::config::EmailConfig;
use driftboard_common::{Error, Result};

/// The email sink: one "send a message" operation over SMTP. Without an SMTP
/// host configured, sends are logged and dropped so development environments
/// work without a relay.
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(cfg: &EmailConfig) -> Result<Self> {
        let from: Mailbox = cfg
            .from_address
            .parse()
            .map_err(|_| Error::InvalidParam(format!("bad SMTP_FROM address {}", cfg.from_address)))?;

        let transport = match &cfg.smtp_host {
            Some(host) => {
                let builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(|e| Error::Internal(format!("smtp relay {host}: {e}")))?;
                let builder = if cfg.smtp_username.is_empty() {
                    builder
                } else {
                    builder.credentials(Credentials::new(
                        cfg.smtp_username.clone(),
                        cfg.smtp_password.clone(),
                    ))
                };
                Some(builder.build())
            }
            None => None,
        };

        Ok(Mailer { transport, from })
    }

    pub async fn send_verification_code(&self, to: &str, code: &str) -> Result<()> {
        let Some(transport) = &self.transport else {
            tracing::info!(to, code, "SMTP not configured, dropping verification mail");
            return Ok(());
        };

        let to: Mailbox = to
            .parse()
            .map_err(|_| Error::InvalidParam(format!("bad recipient address {to}")))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Your driftboard verification code")
            .body(format!(
                "Your verification code is {code}. It expires in a few minutes."
            ))
            .map_err(|e| Error::Internal(format!("build mail: {e}")))?;

        transport
            .send(message)
            .await
            .map_err(|e| Error::Internal(format!("send mail: {e}")))?;
        Ok(())
    }
}

/// Six decimal digits, the shape expected at registration.
pub fn generate_verification_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..6).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_verification_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
