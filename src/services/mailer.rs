use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outgoing mail seam.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// Writes outgoing mail to the log instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        tracing::info!(subject = %email.subject, "Outgoing email");
        tracing::debug!(to = %email.to, body = %email.body, "Outgoing email body");
        Ok(())
    }
}

/// Builds the messages the account flows send.
pub struct Templates<'a> {
    pub domain: &'a str,
}

impl Templates<'_> {
    fn link(&self, path: &str, params: &[(&str, &str)]) -> String {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        format!("https://{}{}?{}", self.domain, path, query)
    }

    fn footer(&self, email: &str, do_not_email_code: &str) -> String {
        format!(
            "\n\nDon't want these emails? {}",
            self.link("/do-not-email", &[("email", email), ("code", do_not_email_code)])
        )
    }

    pub fn confirm_email(
        &self,
        email: &str,
        code: &str,
        browser: bool,
        lockdown: bool,
        do_not_email_code: &str,
    ) -> Email {
        let mut params = vec![("email", email), ("code", code)];
        if browser {
            params.push(("browser", "true"));
        }
        if lockdown {
            params.push(("lockdown", "true"));
        }
        Email {
            to: email.to_string(),
            subject: "Click to Confirm Email".to_string(),
            body: format!(
                "Please confirm your email address: {}{}",
                self.link("/confirm-email", &params),
                self.footer(email, do_not_email_code)
            ),
        }
    }

    pub fn confirm_change_email(&self, email: &str, code: &str, do_not_email_code: &str) -> Email {
        Email {
            to: email.to_string(),
            subject: "Click to Confirm Email Change".to_string(),
            body: format!(
                "Please confirm your new email address: {}{}",
                self.link("/confirm-change-email", &[("email", email), ("code", code)]),
                self.footer(email, do_not_email_code)
            ),
        }
    }

    pub fn password_reset(&self, email: &str, code: &str, do_not_email_code: &str) -> Email {
        Email {
            to: email.to_string(),
            subject: "Your Password Reset Link".to_string(),
            body: format!(
                "Reset your password within the next hour: {}{}",
                self.link("/reset-password", &[("code", code)]),
                self.footer(email, do_not_email_code)
            ),
        }
    }

    pub fn password_changed(&self, email: &str, do_not_email_code: &str) -> Email {
        Email {
            to: email.to_string(),
            subject: "Your Password Was Changed".to_string(),
            body: format!(
                "The password for your account was just changed. If this wasn't you, reset it at {}{}",
                format_args!("https://{}/forgot-password", self.domain),
                self.footer(email, do_not_email_code)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_links_are_query_encoded() {
        let templates = Templates { domain: "confirmedvpn.test" };
        let email = templates.confirm_email("a+b@example.com", "CODE123", true, false, "footer");

        assert!(email.body.contains(
            "https://confirmedvpn.test/confirm-email?email=a%2Bb%40example.com&code=CODE123&browser=true"
        ));
        assert!(email.body.contains("/do-not-email?email=a%2Bb%40example.com&code=footer"));
    }
}
