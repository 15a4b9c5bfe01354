use chrono::{DateTime, Utc};
use imgvault_core::{LifecycleConfig, StorageTier, StoredImage};

/// A single forward tier move decided for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTransition {
    pub key: String,
    pub from: StorageTier,
    pub to: StorageTier,
    /// Whole days since `created_at` when the decision was made.
    pub age_days: i64,
}

impl TierTransition {
    pub fn is_deletion(&self) -> bool {
        self.to == StorageTier::Deleted
    }
}

/// Age thresholds, in whole days since `created_at`.
///
/// Permanent objects still move to INFREQUENT but are never archived or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub infrequent_after_days: i64,
    pub archive_after_days: i64,
    pub expire_after_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

impl From<&LifecycleConfig> for LifecyclePolicy {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            infrequent_after_days: config.infrequent_after_days,
            archive_after_days: config.archive_after_days,
            expire_after_days: config.expire_after_days,
        }
    }
}

impl LifecyclePolicy {
    fn next_tier(&self, tier: StorageTier, permanent: bool, age_days: i64) -> Option<StorageTier> {
        match tier {
            StorageTier::Standard if age_days >= self.infrequent_after_days => {
                Some(StorageTier::Infrequent)
            }
            StorageTier::Infrequent if !permanent && age_days >= self.archive_after_days => {
                Some(StorageTier::Archive)
            }
            StorageTier::Archive if !permanent && age_days >= self.expire_after_days => {
                Some(StorageTier::Deleted)
            }
            _ => None,
        }
    }

    /// The next transition due for `image` at `now`, if any.
    pub fn evaluate(&self, image: &StoredImage, now: DateTime<Utc>) -> Option<TierTransition> {
        let age_days = image.age(now).num_days();
        self.next_tier(image.tier, image.permanent, age_days)
            .map(|to| TierTransition {
                key: image.key.clone(),
                from: image.tier,
                to,
                age_days,
            })
    }

    /// Every transition needed to bring `image` up to date, in order.
    pub fn settle(&self, image: &StoredImage, now: DateTime<Utc>) -> Vec<TierTransition> {
        let age_days = image.age(now).num_days();
        let mut tier = image.tier;
        let mut transitions = Vec::new();
        while let Some(to) = self.next_tier(tier, image.permanent, age_days) {
            transitions.push(TierTransition {
                key: image.key.clone(),
                from: tier,
                to,
                age_days,
            });
            tier = to;
        }
        transitions
    }
}

/// [`LifecyclePolicy::evaluate`] with the default 90 / 270 / 635 day thresholds.
pub fn evaluate(image: &StoredImage, now: DateTime<Utc>) -> Option<TierTransition> {
    LifecyclePolicy::default().evaluate(image, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn image(tier: StorageTier, permanent: bool) -> StoredImage {
        StoredImage {
            key: "generated_images/7.webp".into(),
            content_type: "image/webp".into(),
            size_bytes: 10,
            original_size_bytes: Some(40),
            etag: String::new(),
            created_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            tier,
            permanent,
            metadata: BTreeMap::new(),
        }
    }

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(n)
    }

    #[test]
    fn thresholds_are_inclusive() {
        let standard = image(StorageTier::Standard, false);
        assert_eq!(evaluate(&standard, day(89)), None);
        assert_eq!(evaluate(&standard, day(90)).map(|t| t.to), Some(StorageTier::Infrequent));

        let infrequent = image(StorageTier::Infrequent, false);
        assert_eq!(evaluate(&infrequent, day(269)), None);
        assert_eq!(evaluate(&infrequent, day(270)).map(|t| t.to), Some(StorageTier::Archive));

        let archived = image(StorageTier::Archive, false);
        assert_eq!(evaluate(&archived, day(634)), None);
        let expiry = evaluate(&archived, day(635)).unwrap();
        assert!(expiry.is_deletion());
        assert_eq!(expiry.age_days, 635);
    }

    #[test]
    fn just_short_of_a_day_does_not_count() {
        let standard = image(StorageTier::Standard, false);
        let almost = day(90) - chrono::Duration::seconds(1);
        assert_eq!(evaluate(&standard, almost), None);
    }

    #[test]
    fn permanent_objects_stop_at_infrequent() {
        let standard = image(StorageTier::Standard, true);
        assert_eq!(evaluate(&standard, day(90)).map(|t| t.to), Some(StorageTier::Infrequent));

        let infrequent = image(StorageTier::Infrequent, true);
        assert_eq!(evaluate(&infrequent, day(10_000)), None);

        let archived = image(StorageTier::Archive, true);
        assert_eq!(evaluate(&archived, day(10_000)), None);
    }

    #[test]
    fn settle_catches_up_in_order() {
        let chain: Vec<_> = LifecyclePolicy::default()
            .settle(&image(StorageTier::Standard, false), day(700))
            .into_iter()
            .map(|t| (t.from, t.to))
            .collect();
        assert_eq!(
            chain,
            vec![
                (StorageTier::Standard, StorageTier::Infrequent),
                (StorageTier::Infrequent, StorageTier::Archive),
                (StorageTier::Archive, StorageTier::Deleted),
            ]
        );

        let permanent = LifecyclePolicy::default().settle(&image(StorageTier::Standard, true), day(700));
        assert_eq!(permanent.len(), 1);
    }

    #[test]
    fn deleted_and_future_objects_do_not_move() {
        assert_eq!(evaluate(&image(StorageTier::Deleted, false), day(5_000)), None);
        assert_eq!(evaluate(&image(StorageTier::Standard, false), day(-3)), None);
    }
}
