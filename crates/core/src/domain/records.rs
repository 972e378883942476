//! Records handed to the persistence collaborator.
//!
//! Field names serialize with the keys the front-end already consumes
//! (`numero`, `nom`, `heure`, ...), so the JSON written by the HTTP layer and
//! pushed over the realtime channel is the same shape clients have always read.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    #[serde(rename = "numero")]
    pub number: String,
    pub timestamp: DateTime<Utc>,
}

impl Reminder {
    pub fn new(number: &str) -> Result<Self, DomainError> {
        let number = number.trim();
        if number.is_empty() {
            return Err(DomainError::MissingField("numero"));
        }
        if !is_phone_number(number) {
            return Err(DomainError::InvalidField {
                field: "numero",
                reason: "expected exactly 10 digits".to_owned(),
            });
        }

        Ok(Self { number: number.to_owned(), timestamp: Utc::now() })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(rename = "nom")]
    pub name: String,
    pub date: String,
    #[serde(rename = "heure")]
    pub time: String,
    #[serde(rename = "numero_mobile")]
    pub mobile: String,
    #[serde(rename = "objet_demande")]
    pub purpose: String,
    pub timestamp: DateTime<Utc>,
}

impl Appointment {
    /// Validates the five appointment fields, in the order they are requested
    /// from the visitor. `purpose` is free text and may be empty.
    pub fn new(
        name: &str,
        date: &str,
        time: &str,
        mobile: &str,
        purpose: &str,
    ) -> Result<Self, DomainError> {
        let name = name.trim();
        let date = date.trim();
        let time = time.trim();
        let mobile = mobile.trim();

        if name.is_empty() {
            return Err(DomainError::MissingField("nom"));
        }
        if NaiveDate::parse_from_str(date, "%d/%m/%Y").is_err() || date.len() != 10 {
            return Err(DomainError::InvalidField {
                field: "date",
                reason: "expected a calendar date as DD/MM/YYYY".to_owned(),
            });
        }
        if NaiveTime::parse_from_str(time, "%H:%M").is_err() || time.len() != 5 {
            return Err(DomainError::InvalidField {
                field: "heure",
                reason: "expected a time as HH:MM".to_owned(),
            });
        }
        if !is_phone_number(mobile) {
            return Err(DomainError::InvalidField {
                field: "numero_mobile",
                reason: "expected exactly 10 digits".to_owned(),
            });
        }

        Ok(Self {
            name: name.to_owned(),
            date: date.to_owned(),
            time: time.to_owned(),
            mobile: mobile.to_owned(),
            purpose: purpose.trim().to_owned(),
            timestamp: Utc::now(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralMessage {
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl GeneralMessage {
    pub fn new(sender: &str, content: &str) -> Result<Self, DomainError> {
        Ok(Self {
            sender: required("sender", sender)?,
            content: required("content", content)?,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl PrivateMessage {
    pub fn new(sender: &str, recipient: &str, content: &str) -> Result<Self, DomainError> {
        Ok(Self {
            sender: required("sender", sender)?,
            recipient: required("recipient", recipient)?,
            content: required("content", content)?,
            timestamp: Utc::now(),
        })
    }

    /// True when the message was exchanged between the two users, either way.
    pub fn is_between(&self, first: &str, second: &str) -> bool {
        (self.sender == first && self.recipient == second)
            || (self.sender == second && self.recipient == first)
    }
}

/// A French phone number as typed by visitors: exactly ten ASCII digits.
pub fn is_phone_number(value: &str) -> bool {
    value.len() == 10 && value.bytes().all(|byte| byte.is_ascii_digit())
}

fn required(field: &'static str, value: &str) -> Result<String, DomainError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::MissingField(field));
    }
    Ok(value.to_owned())
}
