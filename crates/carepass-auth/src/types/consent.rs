//! Consent acknowledgments captured at onboarding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AuthError, AuthResult};

/// `data_type` of the encryption context for consent records.
pub const CONSENT_DATA_TYPE: &str = "consent";

/// Kinds of consent the app collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    /// Medical disclaimers (required).
    MedicalDisclaimers,
    /// Terms of service (required).
    TermsOfService,
    /// Privacy policy (required).
    PrivacyPolicy,
    /// Consent to healthcare consultation.
    HealthcareConsultation,
    /// Acknowledgment that the service is not for emergencies.
    EmergencyCareLimitation,
}

impl ConsentType {
    /// Consents that must be granted when acknowledgments are submitted.
    pub const REQUIRED: [Self; 3] = [
        Self::MedicalDisclaimers,
        Self::TermsOfService,
        Self::PrivacyPolicy,
    ];

    /// Returns the stored name of the consent type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalDisclaimers => "medical_disclaimers",
            Self::TermsOfService => "terms_of_service",
            Self::PrivacyPolicy => "privacy_policy",
            Self::HealthcareConsultation => "healthcare_consultation",
            Self::EmergencyCareLimitation => "emergency_care_limitation",
        }
    }
}

impl fmt::Display for ConsentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medical_disclaimers" => Ok(Self::MedicalDisclaimers),
            "terms_of_service" => Ok(Self::TermsOfService),
            "privacy_policy" => Ok(Self::PrivacyPolicy),
            "healthcare_consultation" => Ok(Self::HealthcareConsultation),
            "emergency_care_limitation" => Ok(Self::EmergencyCareLimitation),
            other => Err(format!("unknown consent type: {other}")),
        }
    }
}

/// Consent flags sent with an onboarding request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentAcknowledgments {
    /// Medical disclaimers accepted.
    pub medical_disclaimers: bool,
    /// Terms of service accepted.
    pub terms_of_service: bool,
    /// Privacy policy accepted.
    pub privacy_policy: bool,
    /// Healthcare consultation consent, if asked.
    pub healthcare_consultation: Option<bool>,
    /// Emergency care limitation acknowledged, if asked.
    pub emergency_care_limitation: Option<bool>,
}

impl ConsentAcknowledgments {
    /// Checks that every required consent was granted.
    ///
    /// # Errors
    ///
    /// Returns `CONSENT_REQUIRED` naming the missing consents.
    pub fn validate(&self) -> AuthResult<()> {
        let missing: Vec<&str> = ConsentType::REQUIRED
            .iter()
            .filter(|ct| !self.is_granted(**ct))
            .map(ConsentType::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::invalid_input(
                "CONSENT_REQUIRED",
                format!("required consents not granted: {}", missing.join(", ")),
            ))
        }
    }

    /// Returns `true` if `consent_type` was granted.
    #[must_use]
    pub fn is_granted(&self, consent_type: ConsentType) -> bool {
        match consent_type {
            ConsentType::MedicalDisclaimers => self.medical_disclaimers,
            ConsentType::TermsOfService => self.terms_of_service,
            ConsentType::PrivacyPolicy => self.privacy_policy,
            ConsentType::HealthcareConsultation => self.healthcare_consultation == Some(true),
            ConsentType::EmergencyCareLimitation => self.emergency_care_limitation == Some(true),
        }
    }

    /// Decisions to record: every required consent plus any optional one the
    /// client answered.
    #[must_use]
    pub fn decisions(&self) -> Vec<(ConsentType, bool)> {
        let mut decisions: Vec<(ConsentType, bool)> = ConsentType::REQUIRED
            .iter()
            .map(|ct| (*ct, self.is_granted(*ct)))
            .collect();
        if let Some(granted) = self.healthcare_consultation {
            decisions.push((ConsentType::HealthcareConsultation, granted));
        }
        if let Some(granted) = self.emergency_care_limitation {
            decisions.push((ConsentType::EmergencyCareLimitation, granted));
        }
        decisions
    }
}

/// A recorded consent decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Row identifier.
    pub id: Uuid,
    /// User who consented.
    pub user_id: Uuid,
    /// What was consented to.
    pub consent_type: ConsentType,
    /// The decision.
    pub granted: bool,
    /// Client IP at the time of consent (encrypted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    /// When the decision was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_consents() {
        let all = ConsentAcknowledgments {
            medical_disclaimers: true,
            terms_of_service: true,
            privacy_policy: true,
            ..Default::default()
        };
        assert!(all.validate().is_ok());

        let missing = ConsentAcknowledgments {
            privacy_policy: false,
            ..all.clone()
        };
        let err = missing.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONSENT_REQUIRED");
        assert!(err.to_string().contains("privacy_policy"));
    }

    #[test]
    fn test_optional_consents_only_when_answered() {
        let acks: ConsentAcknowledgments = serde_json::from_str(
            r#"{"medical_disclaimers":true,"terms_of_service":true,"privacy_policy":true,
                "emergency_care_limitation":false}"#,
        )
        .unwrap();

        let decisions = acks.decisions();
        assert_eq!(decisions.len(), 4);
        assert!(decisions.contains(&(ConsentType::EmergencyCareLimitation, false)));
        assert!(
            !decisions
                .iter()
                .any(|(ct, _)| *ct == ConsentType::HealthcareConsultation)
        );
    }

    #[test]
    fn test_consent_type_names() {
        for ct in [
            ConsentType::MedicalDisclaimers,
            ConsentType::HealthcareConsultation,
            ConsentType::EmergencyCareLimitation,
        ] {
            assert_eq!(ct.as_str().parse::<ConsentType>().unwrap(), ct);
            assert_eq!(
                serde_json::to_value(ct).unwrap(),
                serde_json::Value::String(ct.as_str().to_string())
            );
        }
    }
}
