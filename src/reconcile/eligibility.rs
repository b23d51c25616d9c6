//! Eligibility evaluation for compliance mode.
//!
//! Pure: the verdict depends only on the mailbox snapshot and the reference data.

use std::collections::HashSet;
use std::fmt;

use crate::config::ReconcileSettings;
use crate::reconcile::model::{Classification, MailboxTarget};
use crate::reconcile::reference::ReferenceData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    NoValidLicense,
    UnsupportedSharedLicense,
    Exempt,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::NoValidLicense => write!(f, "no valid license"),
            IneligibleReason::UnsupportedSharedLicense => {
                write!(f, "shared mailbox license does not cover archiving")
            }
            IneligibleReason::Exempt => write!(f, "member of exempt group"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EligibilityVerdict {
    Eligible,
    Ineligible(IneligibleReason),
    AlreadySatisfied,
}

/// Verdict per sub-action. Retention always runs before archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompliancePlan {
    pub retention: EligibilityVerdict,
    pub archive: EligibilityVerdict,
}

impl CompliancePlan {
    /// License-level ineligibility, shared by both sub-actions
    pub fn ineligible_reason(&self) -> Option<&IneligibleReason> {
        match (&self.retention, &self.archive) {
            (EligibilityVerdict::Ineligible(reason), EligibilityVerdict::Ineligible(_)) => Some(reason),
            _ => None,
        }
    }
}

/// SKU rules, upper-cased part numbers
#[derive(Debug, Clone)]
pub struct LicenseRules {
    pub accepted: HashSet<String>,
    pub full_plan: String,
    pub base_plan: String,
    pub archive_addon: String,
}

impl LicenseRules {
    pub fn from_settings(settings: &ReconcileSettings) -> Self {
        Self {
            accepted: settings
                .accepted_skus
                .iter()
                .map(|s| s.to_uppercase())
                .collect(),
            full_plan: settings.full_plan_sku.to_uppercase(),
            base_plan: settings.base_plan_sku.to_uppercase(),
            archive_addon: settings.archive_addon_sku.to_uppercase(),
        }
    }

    fn holds_accepted(&self, skus: &HashSet<String>) -> bool {
        skus.iter().any(|s| self.accepted.contains(s))
    }

    fn license_verdict(
        &self,
        classification: Classification,
        skus: Option<&HashSet<String>>,
    ) -> Option<IneligibleReason> {
        match classification {
            Classification::Individual => match skus {
                Some(skus) if self.holds_accepted(skus) => None,
                _ => Some(IneligibleReason::NoValidLicense),
            },
            Classification::Shared => match skus {
                None => None,
                Some(skus) if skus.contains(&self.full_plan) => None,
                Some(skus) if skus.contains(&self.base_plan) && skus.contains(&self.archive_addon) => None,
                Some(skus) if self.holds_accepted(skus) => None,
                Some(_) => Some(IneligibleReason::UnsupportedSharedLicense),
            },
        }
    }
}

pub struct EligibilityEvaluator {
    rules: LicenseRules,
    policy_name: String,
}

impl EligibilityEvaluator {
    pub fn new(rules: LicenseRules, policy_name: impl Into<String>) -> Self {
        Self {
            rules,
            policy_name: policy_name.into(),
        }
    }

    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    pub fn evaluate(&self, target: &MailboxTarget, reference: &ReferenceData) -> CompliancePlan {
        let skus = reference.licenses_for(&target.identifier);

        if let Some(reason) = self.rules.license_verdict(target.classification, skus) {
            return CompliancePlan {
                retention: EligibilityVerdict::Ineligible(reason.clone()),
                archive: EligibilityVerdict::Ineligible(reason),
            };
        }

        let retention = match target.retention_policy.as_deref() {
            Some(current) if current.trim().eq_ignore_ascii_case(self.policy_name.trim()) => {
                EligibilityVerdict::AlreadySatisfied
            }
            _ => EligibilityVerdict::Eligible,
        };

        // Exemption only ever touches the archive sub-action
        let archive = if reference.is_exempt(&target.identifier) {
            EligibilityVerdict::Ineligible(IneligibleReason::Exempt)
        } else if target.has_archive() {
            EligibilityVerdict::AlreadySatisfied
        } else {
            EligibilityVerdict::Eligible
        };

        CompliancePlan { retention, archive }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> EligibilityEvaluator {
        EligibilityEvaluator::new(
            LicenseRules::from_settings(&ReconcileSettings::default()),
            "Default",
        )
    }

    #[test]
    fn test_unlicensed_individual_is_ineligible() {
        let target = MailboxTarget::new("ann@contoso.com", Classification::Individual);
        let plan = evaluator().evaluate(&target, &ReferenceData::default());
        assert_eq!(plan.ineligible_reason(), Some(&IneligibleReason::NoValidLicense));
    }

    #[test]
    fn test_individual_with_unlisted_sku_is_ineligible() {
        let mut reference = ReferenceData::default();
        reference.insert_entitlement("ann@contoso.com", ["POWER_BI_STANDARD"]);
        let target = MailboxTarget::new("ann@contoso.com", Classification::Individual);
        let plan = evaluator().evaluate(&target, &reference);
        assert_eq!(plan.ineligible_reason(), Some(&IneligibleReason::NoValidLicense));
    }

    #[test]
    fn test_unlicensed_shared_is_eligible_even_with_empty_allow_list() {
        let mut settings = ReconcileSettings::default();
        settings.accepted_skus.clear();
        let evaluator = EligibilityEvaluator::new(LicenseRules::from_settings(&settings), "Default");

        let target = MailboxTarget::new("sales@contoso.com", Classification::Shared);
        let plan = evaluator.evaluate(&target, &ReferenceData::default());
        assert_eq!(plan.retention, EligibilityVerdict::Eligible);
        assert_eq!(plan.archive, EligibilityVerdict::Eligible);
    }

    #[test]
    fn test_shared_license_combinations() {
        let evaluator = evaluator();
        let target = MailboxTarget::new("sales@contoso.com", Classification::Shared);

        let mut base_only = ReferenceData::default();
        base_only.insert_entitlement("sales@contoso.com", ["EXCHANGESTANDARD"]);
        assert_eq!(
            evaluator.evaluate(&target, &base_only).ineligible_reason(),
            Some(&IneligibleReason::UnsupportedSharedLicense)
        );

        let mut base_and_addon = ReferenceData::default();
        base_and_addon.insert_entitlement("sales@contoso.com", ["EXCHANGESTANDARD", "EXCHANGEARCHIVE_ADDON"]);
        assert!(evaluator.evaluate(&target, &base_and_addon).ineligible_reason().is_none());

        let mut full = ReferenceData::default();
        full.insert_entitlement("sales@contoso.com", ["exchangeenterprise"]);
        assert!(evaluator.evaluate(&target, &full).ineligible_reason().is_none());
    }

    #[test]
    fn test_exempt_only_skips_archive() {
        let mut reference = ReferenceData::default();
        reference.insert_entitlement("ann@contoso.com", ["SPE_E3"]);
        reference.insert_exempt("ann@contoso.com");

        let target = MailboxTarget::new("Ann@Contoso.com", Classification::Individual);
        let plan = evaluator().evaluate(&target, &reference);
        assert_eq!(plan.retention, EligibilityVerdict::Eligible);
        assert_eq!(plan.archive, EligibilityVerdict::Ineligible(IneligibleReason::Exempt));
        assert!(plan.ineligible_reason().is_none());
    }

    #[test]
    fn test_already_satisfied_per_sub_action() {
        let mut reference = ReferenceData::default();
        reference.insert_entitlement("ann@contoso.com", ["SPE_E3"]);

        let policy_only = MailboxTarget::new("ann@contoso.com", Classification::Individual)
            .with_retention_policy("default");
        let plan = evaluator().evaluate(&policy_only, &reference);
        assert_eq!(plan.retention, EligibilityVerdict::AlreadySatisfied);
        assert_eq!(plan.archive, EligibilityVerdict::Eligible);

        let archive_only = MailboxTarget::new("ann@contoso.com", Classification::Individual)
            .with_retention_policy("Legacy")
            .with_archive("6d1c1b5e-0000-4000-8000-000000000001");
        let plan = evaluator().evaluate(&archive_only, &reference);
        assert_eq!(plan.retention, EligibilityVerdict::Eligible);
        assert_eq!(plan.archive, EligibilityVerdict::AlreadySatisfied);
    }
}
