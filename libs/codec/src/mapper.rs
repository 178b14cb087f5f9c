//! # Purpose/Vendor Mapper
//!
//! Pure translation between the 11 TCF purposes and the 5 host categories,
//! plus the vendor eligibility rules. No I/O, no state.
//!
//! ```text
//! essential   ← {1}
//! marketing   ← {2, 3, 4}
//! experience  ← {5, 6}
//! measurement ← {7, 8, 9}
//! functional  ← {10, 11}
//! ```
//!
//! Fan-in (purposes → categories) is strict: a category is granted only when
//! every purpose in its set is granted. Partial consent inside a category
//! reads as denied.

use tcf_types::{Categories, Category, ConsentMap, Vendor, MAX_PURPOSE_ID};

const ESSENTIAL_PURPOSES: &[u32] = &[1];
const MARKETING_PURPOSES: &[u32] = &[2, 3, 4];
const EXPERIENCE_PURPOSES: &[u32] = &[5, 6];
const MEASUREMENT_PURPOSES: &[u32] = &[7, 8, 9];
const FUNCTIONAL_PURPOSES: &[u32] = &[10, 11];

/// Purposes that may never rest on legitimate interest (TCF policy v4+)
const CONSENT_ONLY_PURPOSES: &[u32] = &[3, 4, 5, 6];

pub fn purpose_to_category(purpose_id: u32) -> Option<Category> {
    Category::ALL
        .into_iter()
        .find(|category| category_to_purposes(*category).contains(&purpose_id))
}

pub fn category_to_purposes(category: Category) -> &'static [u32] {
    match category {
        Category::Essential => ESSENTIAL_PURPOSES,
        Category::Marketing => MARKETING_PURPOSES,
        Category::Experience => EXPERIENCE_PURPOSES,
        Category::Measurement => MEASUREMENT_PURPOSES,
        Category::Functional => FUNCTIONAL_PURPOSES,
    }
}

/// Fan each category decision out to every purpose in its set
pub fn categories_to_purpose_consents(categories: &Categories) -> ConsentMap {
    Category::ALL
        .into_iter()
        .flat_map(|category| {
            let granted = categories.get(category);
            category_to_purposes(category)
                .iter()
                .map(move |purpose_id| (*purpose_id, granted))
        })
        .collect()
}

/// A category is granted only if all of its purposes are granted
pub fn purpose_consents_to_categories(purposes: &ConsentMap) -> Categories {
    let mut categories = Categories::default();
    for category in Category::ALL {
        let granted = category_to_purposes(category)
            .iter()
            .all(|purpose_id| purposes.is_granted(*purpose_id));
        categories.set(category, granted);
    }
    categories
}

/// Legitimate-interest transparency for purposes that allow LI
pub fn legitimate_interest_purposes(categories: &Categories) -> ConsentMap {
    let consents = categories_to_purpose_consents(categories);
    (1..=MAX_PURPOSE_ID)
        .map(|id| {
            let allowed = !CONSENT_ONLY_PURPOSES.contains(&id) && id != 1;
            (id, allowed && consents.is_granted(id))
        })
        .collect()
}

pub fn vendor_has_consent(vendor: &Vendor, purpose_consents: &ConsentMap) -> bool {
    vendor
        .purposes
        .iter()
        .all(|purpose_id| purpose_consents.is_granted(*purpose_id))
}

pub fn vendor_has_legitimate_interest(vendor: &Vendor, legitimate_interests: &ConsentMap) -> bool {
    vendor
        .leg_int_purposes
        .iter()
        .all(|purpose_id| legitimate_interests.is_granted(*purpose_id))
}

/// Every consent-basis purpose and every LI purpose must be granted
pub fn vendor_is_eligible(
    vendor: &Vendor,
    purpose_consents: &ConsentMap,
    legitimate_interests: &ConsentMap,
) -> bool {
    vendor_has_consent(vendor, purpose_consents)
        && vendor_has_legitimate_interest(vendor, legitimate_interests)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vendor(purposes: Vec<u32>, leg_int_purposes: Vec<u32>) -> Vendor {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "Test Vendor",
            "purposes": purposes,
            "legIntPurposes": leg_int_purposes,
        }))
        .unwrap()
    }

    #[test]
    fn test_every_purpose_maps_to_one_category() {
        for purpose_id in 1..=MAX_PURPOSE_ID {
            assert!(purpose_to_category(purpose_id).is_some(), "purpose {purpose_id}");
        }
        assert_eq!(purpose_to_category(12), None);
        assert_eq!(purpose_to_category(4), Some(Category::Marketing));
        assert_eq!(purpose_to_category(11), Some(Category::Functional));
    }

    #[test]
    fn test_partial_category_reads_as_denied() {
        let purposes: ConsentMap = [(1, true), (2, true), (3, true), (4, false)]
            .into_iter()
            .collect();
        let categories = purpose_consents_to_categories(&purposes);
        assert!(categories.essential);
        assert!(!categories.marketing);
    }

    #[test]
    fn test_fan_out_applies_category_to_all_purposes() {
        let purposes =
            categories_to_purpose_consents(&Categories::essential_only().with(Category::Measurement, true));
        assert_eq!(purposes.len(), 11);
        assert_eq!(
            purposes.granted_ids().into_iter().collect::<Vec<_>>(),
            vec![1, 7, 8, 9]
        );
    }

    #[test]
    fn test_consent_only_purposes_never_use_legitimate_interest() {
        let lis = legitimate_interest_purposes(&Categories::all_granted());
        assert_eq!(
            lis.granted_ids().into_iter().collect::<Vec<_>>(),
            vec![2, 7, 8, 9, 10, 11]
        );
    }

    #[test]
    fn test_vendor_needs_both_bases() {
        let v = vendor(vec![1, 2], vec![7]);
        let consents = ConsentMap::from_ids([1, 2], true);
        assert!(!vendor_is_eligible(&v, &consents, &ConsentMap::new()));
        assert!(vendor_is_eligible(&v, &consents, &ConsentMap::from_ids([7], true)));
    }

    #[test]
    fn test_vendor_without_declared_purposes_is_eligible() {
        let v = vendor(vec![], vec![]);
        assert!(vendor_is_eligible(&v, &ConsentMap::new(), &ConsentMap::new()));
    }
}
