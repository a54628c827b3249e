// Credential validation and the input_data persistence adapter
//
// Stored credentials are an untyped JSON bag whose shape depends on the
// connector type. Everything past this module works with the typed
// `Credential` union; secrets are masked on every serialization.

use crate::errors::CredentialError;
use crate::models::{ConnectorType, Credential, DatabaseCredential, MailCredential, SourceFamily};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

const MASK_CHAR: char = '*';
const VISIBLE_SUFFIX: usize = 4;

/// Mask all but the last four characters of a secret. Secrets of four
/// characters or fewer are masked entirely.
pub fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= VISIBLE_SUFFIX {
        return MASK_CHAR.to_string().repeat(len);
    }
    let suffix: String = secret.chars().skip(len - VISIBLE_SUFFIX).collect();
    format!("{}{}", MASK_CHAR.to_string().repeat(len - VISIBLE_SUFFIX), suffix)
}

pub(crate) fn serialize_masked_option<S>(
    value: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(secret) => serializer.serialize_some(&mask_secret(secret)),
        None => serializer.serialize_none(),
    }
}

fn required_str(bag: &Map<String, Value>, field: &str) -> Result<String, CredentialError> {
    let value = match bag.get(field) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(_) => {
            return Err(CredentialError::InvalidField {
                field: field.to_string(),
                reason: "expected a string".to_string(),
            })
        }
    };

    if value.is_empty() {
        return Err(CredentialError::MissingField(field.to_string()));
    }
    Ok(value)
}

fn require_non_empty(field: &str, value: &str) -> Result<(), CredentialError> {
    if value.trim().is_empty() {
        return Err(CredentialError::MissingField(field.to_string()));
    }
    Ok(())
}

impl Credential {
    /// Parse the persisted `input_data` bag for a connector type
    pub fn from_input(connector: ConnectorType, input: &Value) -> Result<Self, CredentialError> {
        let bag = input.as_object().ok_or_else(|| CredentialError::InvalidField {
            field: "input_data".to_string(),
            reason: "expected an object".to_string(),
        })?;

        let credential = match connector.family() {
            SourceFamily::Mail => Credential::Mail(MailCredential {
                refresh_token: required_str(bag, "refresh_token")?,
            }),
            SourceFamily::Database => Credential::Database(DatabaseCredential {
                host: required_str(bag, "host")?,
                port: required_str(bag, "port")?,
                username: required_str(bag, "username")?,
                password: required_str(bag, "password")?,
                database_name: required_str(bag, "database_name")?,
            }),
        };

        validate(connector, &credential)?;
        Ok(credential)
    }

    /// Parse a bag read back from storage. Absent keys become empty
    /// strings so a stale credential still loads; `validate` reports it.
    pub fn from_stored(connector: ConnectorType, input: &Value) -> Result<Self, CredentialError> {
        let bag = input.as_object().ok_or_else(|| CredentialError::InvalidField {
            field: "input_data".to_string(),
            reason: "expected an object".to_string(),
        })?;
        let field = |name: &str| match bag.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        Ok(match connector.family() {
            SourceFamily::Mail => Credential::Mail(MailCredential {
                refresh_token: field("refresh_token"),
            }),
            SourceFamily::Database => Credential::Database(DatabaseCredential {
                host: field("host"),
                port: field("port"),
                username: field("username"),
                password: field("password"),
                database_name: field("database_name"),
            }),
        })
    }

    /// Serialize for storage. Secrets are kept verbatim; never return
    /// this value to a caller.
    pub fn to_input_data(&self) -> Value {
        match self {
            Credential::Mail(mail) => json!({ "refresh_token": mail.refresh_token }),
            Credential::Database(db) => json!({
                "host": db.host,
                "port": db.port,
                "username": db.username,
                "password": db.password,
                "database_name": db.database_name,
            }),
        }
    }

    /// Copy with secret fields masked
    pub fn masked(&self) -> Self {
        match self {
            Credential::Mail(mail) => Credential::Mail(MailCredential {
                refresh_token: mask_secret(&mail.refresh_token),
            }),
            Credential::Database(db) => Credential::Database(DatabaseCredential {
                password: mask_secret(&db.password),
                ..db.clone()
            }),
        }
    }
}

impl Serialize for Credential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Credential::Mail(mail) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("refresh_token", &mask_secret(&mail.refresh_token))?;
                map.end()
            }
            Credential::Database(db) => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("host", &db.host)?;
                map.serialize_entry("port", &db.port)?;
                map.serialize_entry("username", &db.username)?;
                map.serialize_entry("password", &mask_secret(&db.password))?;
                map.serialize_entry("database_name", &db.database_name)?;
                map.end()
            }
        }
    }
}

impl DatabaseCredential {
    pub fn port_number(&self) -> Result<u16, CredentialError> {
        self.port
            .trim()
            .parse::<u16>()
            .map_err(|e| CredentialError::InvalidField {
                field: "port".to_string(),
                reason: e.to_string(),
            })
    }

    /// Display name used when the caller does not pick one
    pub fn display_name(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database_name
        )
    }
}

/// Static precondition check of a credential against its connector type
pub fn validate(connector: ConnectorType, credential: &Credential) -> Result<(), CredentialError> {
    match (connector.family(), credential) {
        (SourceFamily::Mail, Credential::Mail(mail)) => {
            require_non_empty("refresh_token", &mail.refresh_token)
        }
        (SourceFamily::Database, Credential::Database(db)) => {
            require_non_empty("host", &db.host)?;
            require_non_empty("port", &db.port)?;
            require_non_empty("username", &db.username)?;
            require_non_empty("password", &db.password)?;
            require_non_empty("database_name", &db.database_name)?;
            db.port_number().map(|_| ())
        }
        (family, _) => Err(CredentialError::InvalidField {
            field: "input_data".to_string(),
            reason: format!("expected a {} credential", family_name(family)),
        }),
    }
}

fn family_name(family: SourceFamily) -> &'static str {
    match family {
        SourceFamily::Mail => "mail",
        SourceFamily::Database => "database",
    }
}
