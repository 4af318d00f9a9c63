//! Discount Resolver
//!
//! Pure evaluation of discount policies. Policies run in a fixed order
//! (priority, then name, then id) and each discount is capped at what
//! is left of the charge, so the result is deterministic for a given
//! student, policy set and charge.

use crate::domain::{AppliedDiscount, DiscountKind, DiscountMode, DiscountPolicy, Money, Student};

/// Sibling policies without an explicit threshold apply from the second child
const DEFAULT_SIBLING_POSITION: u32 = 2;

/// Outcome of resolving policies for one charge
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedDiscounts {
    /// In evaluation order
    pub applied: Vec<AppliedDiscount>,
    pub total: Money,
}

/// Stateless policy evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscountResolver;

impl DiscountResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the discounts `student` earns on `charge`.
    ///
    /// Policies belonging to another tenant, inactive policies and
    /// policies that fail validation are ignored.
    pub fn resolve(&self, student: &Student, policies: &[DiscountPolicy], charge: Money) -> ResolvedDiscounts {
        let mut ordered: Vec<&DiscountPolicy> = policies
            .iter()
            .filter(|p| p.tenant_id == student.tenant_id && p.is_active)
            .collect();
        ordered.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut remaining = charge.floor_zero();
        let mut resolved = ResolvedDiscounts::default();

        for policy in ordered {
            if remaining.is_zero() {
                break;
            }
            if let Err(e) = policy.validate() {
                tracing::warn!(policy_id = %policy.id, error = %e, "Skipping invalid discount policy");
                continue;
            }
            if !Self::applies_to(policy, student) {
                continue;
            }

            let amount = Self::amount_for(policy, charge).min(remaining);
            if !amount.is_positive() {
                continue;
            }

            remaining -= amount;
            resolved.total += amount;
            resolved.applied.push(AppliedDiscount {
                policy_id: policy.id,
                name: policy.name.clone(),
                kind: policy.kind,
                amount,
            });
        }

        resolved
    }

    /// Applicability conditions per policy kind
    pub fn applies_to(policy: &DiscountPolicy, student: &Student) -> bool {
        match policy.kind {
            DiscountKind::StaffChild => student.is_staff_child,
            DiscountKind::Sibling => {
                let threshold = policy.min_sibling_position.unwrap_or(DEFAULT_SIBLING_POSITION);
                student
                    .sibling_position
                    .map(|position| position >= threshold)
                    .unwrap_or(false)
            }
            DiscountKind::Merit | DiscountKind::FinancialAid => {
                let tag = policy
                    .category_tag
                    .as_deref()
                    .unwrap_or_else(|| policy.kind.as_str());
                student.has_tag(tag)
            }
        }
    }

    fn amount_for(policy: &DiscountPolicy, charge: Money) -> Money {
        match policy.mode {
            DiscountMode::Percentage => charge.floor_zero().percent(policy.magnitude),
            DiscountMode::Fixed => Money::new(policy.magnitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn student(tenant_id: Uuid) -> Student {
        Student::new(tenant_id, "Meera", Uuid::new_v4(), "Class-5", Some("A".into()), Money::from_major(5000))
    }

    #[test]
    fn test_no_policies_no_discount() {
        let tenant = Uuid::new_v4();
        let resolved = DiscountResolver::new().resolve(&student(tenant), &[], Money::from_major(5000));
        assert!(resolved.applied.is_empty());
        assert_eq!(resolved.total, Money::ZERO);
    }

    #[test]
    fn test_staff_child_percentage() {
        let tenant = Uuid::new_v4();
        let mut s = student(tenant);
        s.is_staff_child = true;
        let policy = DiscountPolicy::new(tenant, "Staff", DiscountKind::StaffChild, DiscountMode::Percentage, dec!(50));

        let resolved = DiscountResolver::new().resolve(&s, &[policy.clone()], Money::from_major(5000));
        assert_eq!(resolved.total, Money::from_major(2500));
        assert_eq!(resolved.applied[0].policy_id, policy.id);
    }

    #[test]
    fn test_sibling_threshold() {
        let tenant = Uuid::new_v4();
        let policy = DiscountPolicy::new(tenant, "Sibling", DiscountKind::Sibling, DiscountMode::Fixed, dec!(500))
            .with_min_sibling_position(2);

        let mut eldest = student(tenant);
        eldest.sibling_position = Some(1);
        let mut second = student(tenant);
        second.sibling_position = Some(2);
        let mut third = student(tenant);
        third.sibling_position = Some(3);

        let resolver = DiscountResolver::new();
        let charge = Money::from_major(5000);
        assert_eq!(resolver.resolve(&eldest, &[policy.clone()], charge).total, Money::ZERO);
        assert_eq!(resolver.resolve(&second, &[policy.clone()], charge).total, Money::from_major(500));
        assert_eq!(resolver.resolve(&third, &[policy], charge).total, Money::from_major(500));
    }

    #[test]
    fn test_category_tag_required() {
        let tenant = Uuid::new_v4();
        let policy = DiscountPolicy::new(tenant, "Merit", DiscountKind::Merit, DiscountMode::Percentage, dec!(10))
            .with_category_tag("topper");
        let mut s = student(tenant);

        let resolver = DiscountResolver::new();
        assert_eq!(resolver.resolve(&s, &[policy.clone()], Money::from_major(5000)).total, Money::ZERO);

        s.category_tags.push("topper".into());
        assert_eq!(resolver.resolve(&s, &[policy], Money::from_major(5000)).total, Money::from_major(500));
    }

    #[test]
    fn test_total_capped_at_charge() {
        let tenant = Uuid::new_v4();
        let mut s = student(tenant);
        s.is_staff_child = true;
        s.category_tags.push("financial_aid".into());
        let policies = vec![
            DiscountPolicy::new(tenant, "Staff", DiscountKind::StaffChild, DiscountMode::Percentage, dec!(75)),
            DiscountPolicy::new(tenant, "Aid", DiscountKind::FinancialAid, DiscountMode::Fixed, dec!(2000)),
        ];

        let resolved = DiscountResolver::new().resolve(&s, &policies, Money::from_major(5000));
        // "Aid" sorts first: 2000, then 75% of 5000 capped at the remaining 3000
        assert_eq!(resolved.applied[0].name, "Aid");
        assert_eq!(resolved.applied[1].amount, Money::from_major(3000));
        assert_eq!(resolved.total, Money::from_major(5000));
    }

    #[test]
    fn test_priority_orders_evaluation() {
        let tenant = Uuid::new_v4();
        let mut s = student(tenant);
        s.is_staff_child = true;
        s.sibling_position = Some(2);
        let policies = vec![
            DiscountPolicy::new(tenant, "A-sibling", DiscountKind::Sibling, DiscountMode::Fixed, dec!(100)).with_priority(5),
            DiscountPolicy::new(tenant, "Z-staff", DiscountKind::StaffChild, DiscountMode::Fixed, dec!(200)).with_priority(1),
        ];

        let resolved = DiscountResolver::new().resolve(&s, &policies, Money::from_major(1000));
        let names: Vec<&str> = resolved.applied.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Z-staff", "A-sibling"]);
    }

    #[test]
    fn test_foreign_and_inactive_policies_ignored() {
        let tenant = Uuid::new_v4();
        let mut s = student(tenant);
        s.is_staff_child = true;
        let foreign = DiscountPolicy::new(Uuid::new_v4(), "Other school", DiscountKind::StaffChild, DiscountMode::Fixed, dec!(100));
        let mut inactive = DiscountPolicy::new(tenant, "Retired", DiscountKind::StaffChild, DiscountMode::Fixed, dec!(100));
        inactive.is_active = false;

        let resolved = DiscountResolver::new().resolve(&s, &[foreign, inactive], Money::from_major(1000));
        assert_eq!(resolved.total, Money::ZERO);
    }

    #[test]
    fn test_deterministic_across_input_order() {
        let tenant = Uuid::new_v4();
        let mut s = student(tenant);
        s.is_staff_child = true;
        s.category_tags.push("merit".into());
        let a = DiscountPolicy::new(tenant, "Merit", DiscountKind::Merit, DiscountMode::Percentage, dec!(10));
        let b = DiscountPolicy::new(tenant, "Staff", DiscountKind::StaffChild, DiscountMode::Fixed, dec!(300));

        let resolver = DiscountResolver::new();
        let charge = Money::from_major(4000);
        let first = resolver.resolve(&s, &[a.clone(), b.clone()], charge);
        let second = resolver.resolve(&s, &[b, a], charge);
        assert_eq!(first, second);
    }
}
