use super::{DocumentStore, Persistence};
use serde_json::json;
use tempfile::{TempDir, tempdir};

fn create_test_persistence() -> (Persistence, TempDir) {
    let dir = tempdir().unwrap();
    let persistence = Persistence::open(dir.path().to_str().unwrap()).unwrap();
    (persistence, dir)
}

#[test]
fn test_insert_and_load_document() {
    let (persistence, _dir) = create_test_persistence();
    let order = json!({"customerId": "c1", "items": [{"productId": "p1", "quantity": 2, "price": 9.99}]});

    let id = persistence.insert_document("orders", &order).unwrap();
    let documents = persistence.load_documents("orders").unwrap();

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, id);
    assert_eq!(documents[0].document, order);
}

#[test]
fn test_documents_are_stored_verbatim() {
    let (persistence, _dir) = create_test_persistence();
    let order = json!({"customerId": "c9", "items": [], "giftWrap": true, "note": {"text": "hi"}});

    let id = persistence.insert("orders", &order).unwrap();
    let stored = persistence.get_document("orders", &id).unwrap().unwrap();

    assert_eq!(stored.document["giftWrap"], json!(true));
    assert_eq!(stored.document["note"]["text"], "hi");
    assert!(stored.document.get("_id").is_none());
}

#[test]
fn test_non_object_documents_are_accepted() {
    let (persistence, _dir) = create_test_persistence();

    persistence.insert_document("orders", &json!("not json")).unwrap();
    let documents = persistence.load_documents("orders").unwrap();

    assert_eq!(documents[0].document, json!("not json"));
}

#[test]
fn test_insertion_order_is_preserved() {
    let (persistence, _dir) = create_test_persistence();

    for i in 0..3 {
        persistence
            .insert_document("orders", &json!({ "customerId": format!("c{i}") }))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2)); // distinct timestamps
    }

    let customers: Vec<_> = persistence
        .load_documents("orders")
        .unwrap()
        .into_iter()
        .map(|d| d.document["customerId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(customers, vec!["c0", "c1", "c2"]);
}

#[test]
fn test_collections_are_isolated() {
    let (persistence, _dir) = create_test_persistence();

    persistence.insert_document("orders", &json!({})).unwrap();
    persistence.insert_document("archive", &json!({})).unwrap();
    persistence.insert_document("archive", &json!({})).unwrap();

    assert_eq!(persistence.count("orders").unwrap(), 1);
    assert_eq!(persistence.count("archive").unwrap(), 2);
}

#[test]
fn test_empty_collection_returns_empty_vec() {
    let (persistence, _dir) = create_test_persistence();
    assert!(persistence.load_documents("nonexistent").unwrap().is_empty());
    assert!(persistence.get_document("nonexistent", "missing").unwrap().is_none());
}

#[test]
fn test_ids_follow_insertion_not_the_clock() {
    let (persistence, _dir) = create_test_persistence();

    // no pause between inserts: many share a millisecond
    let ids: Vec<String> = (0..50)
        .map(|i| persistence.insert_document("orders", &json!({ "n": i })).unwrap())
        .collect();

    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let order: Vec<i64> = persistence
        .load_documents("orders")
        .unwrap()
        .into_iter()
        .map(|d| d.document["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, (0..50).collect::<Vec<i64>>());
}
