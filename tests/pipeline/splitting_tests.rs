use crmtap::pipeline::stream::{CrmStream, StreamDef};
use crmtap::utils::properties::{joined_len, split_properties, PROPERTIES_PARAM_MAX_LENGTH};
use futures::TryStreamExt;
use serde_json::json;

use crate::support::{fake_properties_list, object_body, properties_response, MockGetter, NUMBER_OF_PROPERTIES};

fn partitions() -> Vec<Vec<String>> {
    split_properties(&fake_properties_list(), PROPERTIES_PARAM_MAX_LENGTH).collect()
}

#[test]
fn test_splitting_properties() {
    let parts = partitions();

    assert!(parts.len() > 1, "2000 properties must not fit one request");
    for part in &parts {
        assert!(joined_len(part) <= PROPERTIES_PARAM_MAX_LENGTH);
    }
    let total: usize = parts.iter().map(Vec::len).sum();
    assert_eq!(total, NUMBER_OF_PROPERTIES);
}

#[test]
fn test_oversized_single_property_is_not_split() {
    let mut props = fake_properties_list();
    props.insert(3, "p".repeat(PROPERTIES_PARAM_MAX_LENGTH + 10));

    let parts: Vec<Vec<String>> = split_properties(&props, PROPERTIES_PARAM_MAX_LENGTH).collect();

    let oversized: Vec<&Vec<String>> = parts
        .iter()
        .filter(|p| joined_len(p.as_slice()) > PROPERTIES_PARAM_MAX_LENGTH)
        .collect();
    assert_eq!(oversized.len(), 1);
    assert_eq!(oversized[0].len(), 1);
    assert_eq!(parts.iter().flatten().cloned().collect::<Vec<_>>(), props);
}

#[tokio::test]
async fn test_stream_with_splitting_properties() {
    let getter = MockGetter::new();
    let props = fake_properties_list();
    getter.register(
        "/properties/v2/company/properties",
        None,
        None,
        properties_response(&props),
    );

    let stream = CrmStream::new(StreamDef::crm_object("companies", "company"));
    let url = stream.def().path.clone();

    let record_ids_paginated: Vec<Vec<String>> = vec![
        (0..100).map(|i| i.to_string()).collect(),
        (100..150).map(|i| i.to_string()).collect(),
    ];

    let mut after_id: Option<String> = None;
    for id_list in &record_ids_paginated {
        for slice in partitions() {
            let results: Vec<_> = id_list.iter().map(|id| object_body(id, &slice)).collect();
            let paging = if id_list.len() == 100 {
                json!({"next": {"after": id_list.last().unwrap()}})
            } else {
                json!({})
            };
            getter.register(
                &url,
                Some(slice.join(",").as_str()),
                after_id.as_deref(),
                json!({"results": results, "paging": paging}),
            );
        }
        after_id = id_list.last().cloned();
    }

    let records: Vec<_> = stream.read(&getter).try_collect().await.unwrap();

    assert_eq!(records.len(), 150);
    for record in &records {
        assert_eq!(record.properties.len(), NUMBER_OF_PROPERTIES);
    }
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids[0], "0");
    assert_eq!(ids[149], "149");

    // one properties request + 2 pages for every partition
    assert_eq!(getter.calls(), 1 + 2 * partitions().len());
}

#[tokio::test]
async fn test_stream_with_splitting_properties_without_pagination() {
    let getter = MockGetter::new();
    let props = fake_properties_list();
    getter.register(
        "/properties/v2/product/properties",
        None,
        None,
        properties_response(&props),
    );

    let stream = CrmStream::new(StreamDef::crm_object("products", "product"));
    let ids = ["6043593519", "1092593519", "1092593518", "1092593517", "1092593516"];
    for slice in partitions() {
        let results: Vec<_> = ids.iter().map(|id| object_body(id, &slice)).collect();
        getter.register(
            &stream.def().path,
            Some(slice.join(",").as_str()),
            None,
            json!({"results": results, "paging": {}}),
        );
    }

    let records: Vec<_> = stream.read(&getter).try_collect().await.unwrap();

    assert_eq!(records.len(), 5);
    for record in &records {
        assert_eq!(record.properties.len(), NUMBER_OF_PROPERTIES);
        assert_eq!(record.archived, Some(false));
    }
}

#[tokio::test]
async fn test_stream_with_splitting_properties_with_new_record() {
    let getter = MockGetter::new();
    let props = fake_properties_list();
    getter.register(
        "/properties/v2/deal/properties",
        None,
        None,
        properties_response(&props),
    );

    let stream = CrmStream::new(StreamDef::crm_object("deals", "deal"));
    let mut ids: Vec<&str> = vec!["6043593519", "1092593519", "1092593518", "1092593517", "1092593516"];
    let parts = partitions();
    for slice in &parts {
        let results: Vec<_> = ids.iter().map(|id| object_body(id, slice)).collect();
        getter.register(
            &stream.def().path,
            Some(slice.join(",").as_str()),
            None,
            json!({"results": results, "paging": {}}),
        );
        ids.push("1092593513");
    }

    let records: Vec<_> = stream.read(&getter).try_collect().await.unwrap();

    assert_eq!(records.len(), 6);
    let late = records.iter().find(|r| r.id == "1092593513").unwrap();
    let expected: usize = parts[1..].iter().map(Vec::len).sum();
    assert_eq!(late.properties.len(), expected);
    assert_eq!(records.last().unwrap().id, "1092593513");
}
