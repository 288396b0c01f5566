//! Shared request-metadata enums and the core segment type.

use serde::{Deserialize, Serialize};

/// Message recipient archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    Boss,
    Client,
    Parent,
    Professor,
    Official,
    Other,
}

impl Persona {
    /// Korean display label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Boss => "직장 상사",
            Self::Client => "고객",
            Self::Parent => "학부모",
            Self::Professor => "교수",
            Self::Official => "공식 기관",
            Self::Other => "기타",
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Boss => "BOSS",
            Self::Client => "CLIENT",
            Self::Parent => "PARENT",
            Self::Professor => "PROFESSOR",
            Self::Official => "OFFICIAL",
            Self::Other => "OTHER",
        };
        write!(f, "{}", s)
    }
}

/// Communication situation tags attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SituationContext {
    Request,
    ScheduleDelay,
    Urging,
    Rejection,
    Apology,
    Complaint,
    Announcement,
    Feedback,
    Billing,
    Support,
    Contract,
    Recruiting,
    CivilComplaint,
    Gratitude,
}

impl SituationContext {
    /// Stable wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::ScheduleDelay => "SCHEDULE_DELAY",
            Self::Urging => "URGING",
            Self::Rejection => "REJECTION",
            Self::Apology => "APOLOGY",
            Self::Complaint => "COMPLAINT",
            Self::Announcement => "ANNOUNCEMENT",
            Self::Feedback => "FEEDBACK",
            Self::Billing => "BILLING",
            Self::Support => "SUPPORT",
            Self::Contract => "CONTRACT",
            Self::Recruiting => "RECRUITING",
            Self::CivilComplaint => "CIVIL_COMPLAINT",
            Self::Gratitude => "GRATITUDE",
        }
    }

    /// Korean display label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Request => "요청",
            Self::ScheduleDelay => "일정 지연",
            Self::Urging => "독촉",
            Self::Rejection => "거절",
            Self::Apology => "사과",
            Self::Complaint => "항의",
            Self::Announcement => "공지",
            Self::Feedback => "피드백",
            Self::Billing => "비용/정산",
            Self::Support => "기술지원",
            Self::Contract => "계약",
            Self::Recruiting => "채용",
            Self::CivilComplaint => "민원",
            Self::Gratitude => "감사",
        }
    }

    /// Parse an uppercase wire value (e.g. from model output).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "REQUEST" => Some(Self::Request),
            "SCHEDULE_DELAY" => Some(Self::ScheduleDelay),
            "URGING" => Some(Self::Urging),
            "REJECTION" => Some(Self::Rejection),
            "APOLOGY" => Some(Self::Apology),
            "COMPLAINT" => Some(Self::Complaint),
            "ANNOUNCEMENT" => Some(Self::Announcement),
            "FEEDBACK" => Some(Self::Feedback),
            "BILLING" => Some(Self::Billing),
            "SUPPORT" => Some(Self::Support),
            "CONTRACT" => Some(Self::Contract),
            "RECRUITING" => Some(Self::Recruiting),
            "CIVIL_COMPLAINT" => Some(Self::CivilComplaint),
            "GRATITUDE" => Some(Self::Gratitude),
            _ => None,
        }
    }
}

/// Politeness intensity requested by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToneLevel {
    Neutral,
    Polite,
    VeryPolite,
}

impl ToneLevel {
    /// Korean display label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Neutral => "중립",
            Self::Polite => "공손",
            Self::VeryPolite => "매우 공손",
        }
    }
}

impl std::fmt::Display for ToneLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Neutral => "NEUTRAL",
            Self::Polite => "POLITE",
            Self::VeryPolite => "VERY_POLITE",
        };
        write!(f, "{}", s)
    }
}

/// Message topic, used for template overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    RefundCancel,
    OutageError,
    AccountPermission,
    DataFile,
    ScheduleDeadline,
    CostBilling,
    ContractTerms,
    HrEvaluation,
    AcademicGrade,
    ComplaintRegulation,
    Other,
}

impl Topic {
    /// Stable wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RefundCancel => "REFUND_CANCEL",
            Self::OutageError => "OUTAGE_ERROR",
            Self::AccountPermission => "ACCOUNT_PERMISSION",
            Self::DataFile => "DATA_FILE",
            Self::ScheduleDeadline => "SCHEDULE_DEADLINE",
            Self::CostBilling => "COST_BILLING",
            Self::ContractTerms => "CONTRACT_TERMS",
            Self::HrEvaluation => "HR_EVALUATION",
            Self::AcademicGrade => "ACADEMIC_GRADE",
            Self::ComplaintRegulation => "COMPLAINT_REGULATION",
            Self::Other => "OTHER",
        }
    }

    /// Parse an uppercase wire value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "REFUND_CANCEL" => Some(Self::RefundCancel),
            "OUTAGE_ERROR" => Some(Self::OutageError),
            "ACCOUNT_PERMISSION" => Some(Self::AccountPermission),
            "DATA_FILE" => Some(Self::DataFile),
            "SCHEDULE_DEADLINE" => Some(Self::ScheduleDeadline),
            "COST_BILLING" => Some(Self::CostBilling),
            "CONTRACT_TERMS" => Some(Self::ContractTerms),
            "HR_EVALUATION" => Some(Self::HrEvaluation),
            "ACADEMIC_GRADE" => Some(Self::AcademicGrade),
            "COMPLAINT_REGULATION" => Some(Self::ComplaintRegulation),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Sender purpose, the primary template selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    InfoDelivery,
    DataRequest,
    ScheduleCoordination,
    ApologyRecovery,
    ResponsibilitySeparation,
    RejectionNotice,
    RefundRejection,
    WarningPrevention,
    RelationshipRecovery,
    NextActionConfirm,
    Announcement,
}

impl Purpose {
    /// Stable wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InfoDelivery => "INFO_DELIVERY",
            Self::DataRequest => "DATA_REQUEST",
            Self::ScheduleCoordination => "SCHEDULE_COORDINATION",
            Self::ApologyRecovery => "APOLOGY_RECOVERY",
            Self::ResponsibilitySeparation => "RESPONSIBILITY_SEPARATION",
            Self::RejectionNotice => "REJECTION_NOTICE",
            Self::RefundRejection => "REFUND_REJECTION",
            Self::WarningPrevention => "WARNING_PREVENTION",
            Self::RelationshipRecovery => "RELATIONSHIP_RECOVERY",
            Self::NextActionConfirm => "NEXT_ACTION_CONFIRM",
            Self::Announcement => "ANNOUNCEMENT",
        }
    }

    /// Parse an uppercase wire value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "INFO_DELIVERY" => Some(Self::InfoDelivery),
            "DATA_REQUEST" => Some(Self::DataRequest),
            "SCHEDULE_COORDINATION" => Some(Self::ScheduleCoordination),
            "APOLOGY_RECOVERY" => Some(Self::ApologyRecovery),
            "RESPONSIBILITY_SEPARATION" => Some(Self::ResponsibilitySeparation),
            "REJECTION_NOTICE" => Some(Self::RejectionNotice),
            "REFUND_REJECTION" => Some(Self::RefundRejection),
            "WARNING_PREVENTION" => Some(Self::WarningPrevention),
            "RELATIONSHIP_RECOVERY" => Some(Self::RelationshipRecovery),
            "NEXT_ACTION_CONFIRM" => Some(Self::NextActionConfirm),
            "ANNOUNCEMENT" => Some(Self::Announcement),
            _ => None,
        }
    }
}

/// A meaning unit produced by the segmenter.
///
/// `start`/`end` are byte offsets into the masked text; `id` is `T{n}` with a
/// 1-based global order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn new(order: usize, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            id: format!("T{}", order),
            text: text.into(),
            start,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_labels() {
        assert_eq!(Persona::Boss.label(), "직장 상사");
        assert_eq!(Persona::Client.to_string(), "CLIENT");
    }

    #[test]
    fn test_context_parse_roundtrip() {
        assert_eq!(
            SituationContext::parse("SCHEDULE_DELAY"),
            Some(SituationContext::ScheduleDelay)
        );
        assert_eq!(SituationContext::parse("nope"), None);
    }

    #[test]
    fn test_purpose_parse() {
        assert_eq!(Purpose::parse("REFUND_REJECTION"), Some(Purpose::RefundRejection));
        assert_eq!(Purpose::parse(" ANNOUNCEMENT "), Some(Purpose::Announcement));
    }

    #[test]
    fn test_segment_id_format() {
        let seg = Segment::new(3, "안녕하세요", 0, 15);
        assert_eq!(seg.id, "T3");
    }
}
