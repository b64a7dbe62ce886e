/// Credential sources used by server authentication
use crate::error::{MongoctlError, MongoctlResult};
use std::io::{self, BufRead, Write};

/// A username with an optional, not yet prompted, password
#[derive(Clone, PartialEq)]
pub struct Login {
    pub username: String,
    pub password: Option<String>,
}

impl Login {
    pub fn new<S: Into<String>>(username: S, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Supplies usernames and passwords that were not given up front
pub trait CredentialSource: Send + Sync {
    fn read_username(&self, dbname: &str) -> MongoctlResult<String>;

    fn read_password(&self, prompt: &str) -> MongoctlResult<String>;
}

/// Reads credentials from the terminal
#[derive(Debug, Default)]
pub struct InteractivePrompt;

impl CredentialSource for InteractivePrompt {
    fn read_username(&self, dbname: &str) -> MongoctlResult<String> {
        print!("Enter username for database '{}': ", dbname);
        io::stdout().flush()?;

        let mut username = String::new();
        io::stdin().lock().read_line(&mut username)?;
        Ok(username.trim().to_string())
    }

    fn read_password(&self, prompt: &str) -> MongoctlResult<String> {
        Ok(rpassword::prompt_password(format!("{}: ", prompt))?)
    }
}

/// Refuses to prompt; only pre-supplied or seeded credentials work
#[derive(Debug, Default)]
pub struct NonInteractive;

impl CredentialSource for NonInteractive {
    fn read_username(&self, dbname: &str) -> MongoctlResult<String> {
        Err(MongoctlError::configuration(format!(
            "No username supplied for database '{}' and prompting is disabled",
            dbname
        )))
    }

    fn read_password(&self, prompt: &str) -> MongoctlResult<String> {
        Err(MongoctlError::configuration(format!(
            "Prompting is disabled ({})",
            prompt
        )))
    }
}

#[cfg(test)]
pub(crate) use mock::MockCredentials;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_debug_hides_password() {
        let login = Login::new("root", Some("secret".to_string()));
        let rendered = format!("{:?}", login);
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_non_interactive_refuses() {
        let source = NonInteractive;
        assert!(source.read_username("admin").is_err());
        assert!(source.read_password("Enter password").is_err());
    }

    #[test]
    fn test_mock_credentials_script() {
        let source = MockCredentials::new(&["root"], &["pw"]);
        assert_eq!(source.read_username("admin").unwrap(), "root");
        assert_eq!(source.read_password("p1").unwrap(), "pw");
        assert!(source.read_password("p2").is_err());
        assert_eq!(source.prompts(), vec!["p1", "p2"]);
    }
}
