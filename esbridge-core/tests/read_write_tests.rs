//! Read and write paths against an in-memory cluster.

use esbridge_core::settings::keys;
use esbridge_core::testing::MemoryCluster;
use esbridge_core::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cluster(nodes: usize, shards: u32) -> Arc<MemoryCluster> {
    init_tracing();
    let cluster = Arc::new(MemoryCluster::with_nodes(nodes));
    cluster.create_index("radio", shards, 1);
    cluster
}

fn client(cluster: &Arc<MemoryCluster>, props: &[(&str, &str)]) -> EsClient {
    let seed = cluster.seed().to_string();
    let mut all = vec![(keys::NODES, seed.as_str()), (keys::RESOURCE, "radio/artists")];
    all.extend_from_slice(props);
    let settings = Settings::from_properties(all).unwrap();
    EsClient::with_transport(settings, cluster.clone())
}

fn doc(value: serde_json::Value) -> Document {
    to_document(&value).unwrap()
}

fn load(cluster: &MemoryCluster, count: usize) {
    for n in 0..count {
        let kind = if n % 2 == 0 { "band" } else { "solo" };
        cluster.index_document("radio", &n.to_string(), json!({ "n": n, "kind": kind }));
    }
}

// =============================================================================
// Topology and Planning
// =============================================================================

#[test]
fn test_two_nodes_three_shards_resolve_to_three_keys() {
    let cluster = cluster(2, 3);
    let topology = client(&cluster, &[]).resolve_shards("radio").unwrap();

    assert_eq!(topology.shard_count(), 3);
    for (shard, candidates) in topology.shards() {
        assert_eq!(shard.index, "radio");
        assert!(!candidates.is_empty());
    }
}

#[test]
fn test_plan_covers_each_shard_once_and_is_deterministic() {
    let cluster = cluster(2, 3);
    let client = client(&cluster, &[]);
    let resource = client.settings().read_resource().unwrap();

    let first = client.build_plan(&resource).unwrap();
    let second = client.build_plan(&resource).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);

    let shards: HashSet<u32> = first.iter().flat_map(|q| q.shards.clone()).collect();
    assert_eq!(shards, HashSet::from([0, 1, 2]));
    let nodes: HashSet<&str> = first.iter().map(|q| q.node_id.as_str()).collect();
    assert_eq!(nodes.len(), 2);
}

#[test]
fn test_pinned_shard_yields_single_disjoint_query() {
    let cluster = cluster(2, 3);
    load(&cluster, 9);

    let mut seen = HashSet::new();
    for shard in ["0", "1", "2"] {
        let client = client(&cluster, &[(keys::INPUT_SHARD, shard)]);
        let resource = client.settings().read_resource().unwrap();
        let plan = client.build_plan(&resource).unwrap();
        assert_eq!(plan.len(), 1);

        let mut cursor = client.cursor(plan.into_iter().next().unwrap());
        while let Some(hit) = cursor.next_hit().unwrap() {
            assert!(seen.insert(hit.id), "document read by two workers");
        }
    }
    assert_eq!(seen.len(), 9);
}

#[test]
fn test_missing_index_is_a_topology_error() {
    let cluster = cluster(1, 1);
    let client = client(&cluster, &[]);
    let err = client
        .build_plan(&Resource::for_read("nowhere").unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::Topology(TopologyError::IndexNotFound { .. })));
}

// =============================================================================
// Cursors
// =============================================================================

#[test]
fn test_cursor_yields_total_hits_without_duplicates() {
    let cluster = cluster(2, 3);
    load(&cluster, 23);
    let client = client(&cluster, &[(keys::SCROLL_SIZE, "4")]);
    let resource = client.settings().read_resource().unwrap();

    let mut ids = HashSet::new();
    for query in client.build_plan(&resource).unwrap() {
        let mut cursor = client.cursor(query);
        cursor.open().unwrap();
        let total = cursor.total_hits().unwrap();
        let mut drained = 0;
        while let Some(hit) = cursor.next_hit().unwrap() {
            assert!(ids.insert(hit.id));
            drained += 1;
        }
        assert_eq!(drained, total);
        assert_eq!(cursor.state(), CursorState::Exhausted);
    }
    assert_eq!(ids.len(), 23);
    assert_eq!(cluster.open_scrolls(), 0);
}

#[test]
fn test_uri_query_filters_reads() {
    let cluster = cluster(2, 3);
    load(&cluster, 10);
    let client = client(&cluster, &[(keys::QUERY, "?q=kind:solo")]);

    let hits = client.scan(&client.settings().read_resource().unwrap()).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.iter().all(|h| h.document["kind"] == "solo"));
}

#[test]
fn test_dsl_query_is_sent_as_body() {
    let cluster = cluster(1, 2);
    load(&cluster, 6);
    let client = client(&cluster, &[(keys::QUERY, r#"{"query":{"term":{"kind":"band"}}}"#)]);

    let hits = client.scan(&client.settings().read_resource().unwrap()).unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn test_zero_match_cursor_is_exhausted_on_open() {
    let cluster = cluster(1, 1);
    load(&cluster, 4);
    let client = client(&cluster, &[(keys::QUERY, "?q=kind:orchestra")]);
    let resource = client.settings().read_resource().unwrap();
    let query = client.build_plan(&resource).unwrap().remove(0);

    let mut cursor = client.open_cursor(query).unwrap();
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert_eq!(cursor.total_hits(), Some(0));
    assert!(cursor.next_hit().unwrap().is_none());
    assert_eq!(cursor.yielded(), 0);
}

#[test]
fn test_double_close_is_a_no_op() {
    let cluster = cluster(1, 1);
    load(&cluster, 10);
    let client = client(&cluster, &[(keys::SCROLL_SIZE, "3")]);
    let resource = client.settings().read_resource().unwrap();
    let query = client.build_plan(&resource).unwrap().remove(0);

    let mut cursor = client.open_cursor(query).unwrap();
    assert!(cursor.next_hit().unwrap().is_some());
    assert_eq!(cluster.open_scrolls(), 1);

    cursor.close().unwrap();
    let after_first = cluster.requests().len();
    cursor.close().unwrap();
    assert_eq!(cluster.requests().len(), after_first);
    assert_eq!(cursor.state(), CursorState::Closed);
    assert_eq!(cluster.open_scrolls(), 0);
}

#[test]
fn test_failed_cursor_leaves_others_intact() {
    let cluster = cluster(1, 2);
    load(&cluster, 8);
    let client = client(&cluster, &[(keys::SCROLL_SIZE, "1")]);
    let resource = client.settings().read_resource().unwrap();
    let mut plan = client.build_plan(&resource).unwrap();
    let second = plan.pop().unwrap();
    let first = plan.pop().unwrap();

    let mut broken = client.open_cursor(first).unwrap();
    let mut healthy = client.open_cursor(second).unwrap();
    assert!(broken.next_hit().unwrap().is_some());

    cluster.fail_next("POST", "/_search/scroll", 500);
    assert!(matches!(broken.next_hit(), Err(Error::Scroll(_))));
    assert_eq!(broken.state(), CursorState::Failed);

    let mut count = 0;
    while healthy.next_hit().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, healthy.total_hits().unwrap());
}

// =============================================================================
// Bulk Writes
// =============================================================================

#[test]
fn test_item_ceiling_of_two_flushes_once_for_three_adds() {
    let cluster = cluster(1, 1);
    let client = client(&cluster, &[(keys::BATCH_SIZE_ENTRIES, "2")]);
    let mut writer = client.bulk_writer(&client.settings().write_resource().unwrap());

    assert!(writer.add(BulkOperation::index(doc(json!({ "n": 1 })))).unwrap().is_none());
    assert!(writer.add(BulkOperation::index(doc(json!({ "n": 2 })))).unwrap().is_some());
    assert!(writer.add(BulkOperation::index(doc(json!({ "n": 3 })))).unwrap().is_none());
    assert_eq!(cluster.bulk_requests(), 1);
    assert_eq!(writer.pending(), 1);

    let report = writer.flush().unwrap();
    assert_eq!(report.items, 1);
    assert_eq!(cluster.bulk_requests(), 2);
}

#[test]
fn test_item_failure_is_reported_with_successful_batch() {
    let cluster = cluster(1, 1);
    cluster.reject_bulk_item(2, 400, "mapper_parsing_exception", "failed to parse field [n]");
    let client = client(&cluster, &[]);
    let mut writer = client.bulk_writer(&client.settings().write_resource().unwrap());

    for n in 0..3 {
        writer.add_document(doc(json!({ "n": n }))).unwrap();
    }
    let report = writer.flush().unwrap();
    assert_eq!(report.items, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].position, 2);
    assert_eq!(report.failures[0].reason, "failed to parse field [n]");
    assert_eq!(cluster.document_count("radio"), 2);
}

#[test]
fn test_empty_flush_makes_no_call() {
    let cluster = cluster(1, 1);
    let client = client(&cluster, &[]);
    let mut writer = client.bulk_writer(&client.settings().write_resource().unwrap());

    assert_eq!(writer.flush().unwrap().items, 0);
    assert!(cluster.requests().is_empty());
}

#[test]
fn test_write_then_read_round_trip() {
    let cluster = cluster(2, 3);
    let client = client(&cluster, &[]);
    let originals: Vec<Document> = (0..12)
        .map(|n| doc(json!({ "name": format!("artist {}", n), "plays": n * 10, "tags": ["a", "b"] })))
        .collect();

    let mut writer = client.bulk_writer(&client.settings().write_resource().unwrap());
    for (n, original) in originals.iter().enumerate() {
        writer
            .add(BulkOperation::index(original.clone()).with_id(n.to_string()))
            .unwrap();
    }
    writer.flush().unwrap();

    let hits = client.scan(&client.settings().read_resource().unwrap()).unwrap();
    assert_eq!(hits.len(), originals.len());
    for hit in hits {
        let n: usize = hit.id.parse().unwrap();
        assert_eq!(hit.document, originals[n]);
    }
}

#[test]
fn test_update_and_delete_actions() {
    let cluster = cluster(1, 1);
    let client = client(&cluster, &[]);
    let mut writer = client.bulk_writer(&client.settings().write_resource().unwrap());

    writer
        .add(BulkOperation::create(doc(json!({ "name": "Blur" }))).with_id("1"))
        .unwrap();
    writer
        .add(BulkOperation::index(doc(json!({ "name": "Oasis" }))).with_id("2"))
        .unwrap();
    writer.flush().unwrap();

    writer
        .add(BulkOperation::update("1", doc(json!({ "year": 1988 }))))
        .unwrap();
    writer.add(BulkOperation::delete("2")).unwrap();
    writer
        .add(BulkOperation::create(doc(json!({ "name": "Blur again" }))).with_id("1"))
        .unwrap();
    let report = writer.flush().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].position, 2);
    assert_eq!(report.failures[0].status, 409);
    let blur = cluster.document("radio", "1").unwrap();
    assert_eq!(blur["name"], "Blur");
    assert_eq!(blur["year"], 1988);
    assert!(cluster.document("radio", "2").is_none());
}

// =============================================================================
// Connector
// =============================================================================

#[test]
fn test_connector_partitions_match_shards() {
    let cluster = cluster(2, 4);
    load(&cluster, 16);
    let client = client(&cluster, &[]);
    let connector = EsConnector::new(client, DocumentCodec::new());

    let partitions = connector.partitions().unwrap();
    assert_eq!(partitions.len(), 4);
    let total: usize = partitions
        .into_iter()
        .map(|p| connector.open_read(p).unwrap().count())
        .sum();
    assert_eq!(total, 16);
}
