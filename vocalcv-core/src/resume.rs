//! The resume the agent answers from, and the system instruction built from it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub address: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub role: String,
    pub company: String,
    pub location: String,
    pub period: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Education {
    pub institution: String,
    pub degree: String,
    pub year: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeData {
    pub name: String,
    #[serde(default)]
    pub contact: Contact,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Vec<Education>,
}

impl ResumeData {
    /// # Errors
    /// `AgentError::InvalidResume` for malformed JSON or a blank name.
    pub fn from_json(raw: &str) -> Result<Self> {
        let resume: ResumeData =
            serde_json::from_str(raw).map_err(|e| AgentError::InvalidResume(e.to_string()))?;
        if resume.name.trim().is_empty() {
            return Err(AgentError::InvalidResume("name must not be empty".into()));
        }
        Ok(resume)
    }

    /// # Errors
    /// `AgentError::Io` if the file cannot be read, otherwise as [`Self::from_json`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Persona rules followed by the resume as compact JSON.
    pub fn system_instruction(&self) -> String {
        let name = self.name.trim();
        // Serializing plain strings and vectors cannot fail.
        let data = serde_json::to_string(self).unwrap_or_default();
        format!(
            "You are the interactive voice assistant for {name}'s resume.\n\
             Your goal is to answer questions from recruiters or interested parties about {name}'s professional background, skills, and education.\n\
             You may speak in the first person (as if you are {name}) or as their direct representative, but keep it professional, polite, and enthusiastic.\n\
             Answer strictly based on the provided resume data. If asked about something not in the resume, politely state that the information is not available in the current document.\n\
             Keep answers concise and suitable for spoken conversation (avoid reading long lists unless asked).\n\
             \n\
             Resume Data:\n\
             {data}\n"
        )
    }
}
