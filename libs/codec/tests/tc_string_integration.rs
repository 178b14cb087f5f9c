//! # TC String Integration Tests
//!
//! End-to-end encode/decode through the public API with a vendor list parsed
//! from GVL JSON, the way the engine receives it.

use chrono::{TimeZone, Utc};
use tcf_codec::{
    categories_to_purpose_consents, decode, encode, is_well_formed, legitimate_interest_purposes,
    purpose_consents_to_categories, vendor_has_consent, DecodeError, EncodeMetadata,
    TcStringCodec,
};
use tcf_types::{Categories, Category, ConsentMap, ConsentState, VendorList};

fn vendor_list() -> VendorList {
    let purposes: serde_json::Map<String, serde_json::Value> = (1..=11)
        .map(|id| (id.to_string(), serde_json::json!({ "id": id, "name": format!("P{id}") })))
        .collect();
    let raw = serde_json::json!({
        "gvlSpecificationVersion": 3,
        "vendorListVersion": 150,
        "tcfPolicyVersion": 5,
        "purposes": purposes,
        "vendors": {
            "1":   { "id": 1,   "name": "Alpha",   "purposes": [1, 2, 3, 4] },
            "2":   { "id": 2,   "name": "Beta",    "purposes": [1, 7], "legIntPurposes": [8] },
            "10":  { "id": 10,  "name": "Gamma",   "purposes": [1, 10] },
            "411": { "id": 411, "name": "Delta",   "purposes": [1, 5, 6] }
        }
    });
    let list: VendorList = serde_json::from_value(raw).unwrap();
    list.validate().unwrap();
    list
}

fn metadata() -> EncodeMetadata {
    let created = Utc.with_ymd_and_hms(2023, 11, 2, 8, 30, 0).unwrap();
    EncodeMetadata {
        cmp_id: 12,
        cmp_version: 2,
        consent_screen: 3,
        consent_language: "FR".to_string(),
        publisher_country_code: "FR".to_string(),
        is_service_specific: true,
        created,
        last_updated: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
    }
}

/// State built the way the reconciliation layer builds it for a category choice
fn state_for(categories: &Categories, list: &VendorList) -> ConsentState {
    let purpose_consents = categories_to_purpose_consents(categories);
    let purpose_legitimate_interests = legitimate_interest_purposes(categories);
    let vendor_consents = list
        .vendors
        .values()
        .map(|v| (v.id, vendor_has_consent(v, &purpose_consents)))
        .collect();
    let vendor_legitimate_interests = list
        .vendors
        .values()
        .map(|v| (v.id, !v.leg_int_purposes.is_empty()))
        .collect();
    ConsentState {
        purpose_consents,
        purpose_legitimate_interests,
        vendor_consents,
        vendor_legitimate_interests,
        special_feature_opt_ins: ConsentMap::from_ids([1, 2], categories.marketing),
        vendors_disclosed: ConsentMap::from_ids(list.vendors.keys().copied(), true),
    }
}

#[test]
fn test_encode_decode_reproduces_decision_maps() {
    let list = vendor_list();
    let categories = Categories::essential_only()
        .with(Category::Measurement, true)
        .with(Category::Functional, true);
    let state = state_for(&categories, &list);

    let tc = encode(&state, &list, &metadata()).unwrap();
    let decoded = decode(&tc).unwrap();

    assert_eq!(
        decoded.state.purpose_consents.granted_ids(),
        state.purpose_consents.granted_ids()
    );
    assert_eq!(
        decoded.state.purpose_legitimate_interests.granted_ids(),
        state.purpose_legitimate_interests.granted_ids()
    );
    assert_eq!(
        decoded.state.vendor_consents.granted_ids(),
        state.vendor_consents.granted_ids()
    );
    assert_eq!(
        decoded.state.vendor_legitimate_interests.granted_ids(),
        state.vendor_legitimate_interests.granted_ids()
    );
    assert_eq!(
        decoded.state.special_feature_opt_ins.granted_ids(),
        state.special_feature_opt_ins.granted_ids()
    );
    assert_eq!(
        decoded.state.vendors_disclosed.granted_ids(),
        state.vendors_disclosed.granted_ids()
    );
    assert_eq!(purpose_consents_to_categories(&decoded.state.purpose_consents), categories);
}

#[test]
fn test_reencoding_decoded_state_is_stable() {
    let list = vendor_list();
    let state = state_for(&Categories::all_granted(), &list);
    let first = encode(&state, &list, &metadata()).unwrap();
    let decoded = decode(&first).unwrap();
    let second = encode(&decoded.state, &list, &metadata()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_decoded_vendor_maps_are_dense_up_to_max_id() {
    let list = vendor_list();
    let tc = encode(&state_for(&Categories::all_granted(), &list), &list, &metadata()).unwrap();
    let decoded = TcStringCodec::new().decode(&tc).unwrap();
    assert_eq!(decoded.state.vendor_consents.len(), 411);
    assert_eq!(decoded.state.vendor_consents.get(3), Some(false));
    assert_eq!(decoded.state.purpose_consents.len(), 11);
    assert_eq!(decoded.state.special_feature_opt_ins.len(), 2);
}

#[test]
fn test_tampered_cookie_values_are_rejected_cheaply() {
    assert!(!is_well_formed("null"));
    assert!(!is_well_formed("CP%3D%3D"));
    assert!(matches!(
        decode("CQ!abc"),
        Err(DecodeError::InvalidCharacter { ch: '!', position: 2 })
    ));
}
