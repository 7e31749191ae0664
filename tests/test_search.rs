mod common;

use edgeindex::{IndexError, SearchTypes};
use serde_json::json;

#[tokio::test]
async fn test_equality_is_case_insensitive() {
    let t = common::setup().await;
    let edge = common::collection_edge(&t.scope, "users", 1000);
    let ann = common::entity("user", json!({"name": "Ann Smith"}));
    let bob = common::entity("user", json!({"name": "Bob"}));
    common::index_all(&t.index, &edge, &[ann.clone(), bob]).await;

    let search = common::search_edge(&t.scope, "users");
    for ql in ["name = 'ann smith'", "name = 'ANN SMITH'", "select * where name = 'Ann Smith'"] {
        let page = t
            .index
            .search_ql(&search, &SearchTypes::all(), ql, None)
            .await
            .unwrap();
        assert_eq!(page.ids(), vec![ann.id.clone().unwrap()], "query: {}", ql);
    }
}

#[tokio::test]
async fn test_contains_and_wildcard() {
    let t = common::setup().await;
    let edge = common::collection_edge(&t.scope, "posts", 1000);
    let rust = common::entity("post", json!({"title": "Learning Rust the hard way"}));
    let go = common::entity("post", json!({"title": "Go for beginners"}));
    common::index_all(&t.index, &edge, &[rust.clone(), go.clone()]).await;

    let search = common::search_edge(&t.scope, "posts");
    let types = SearchTypes::all();

    let page = t
        .index
        .search_ql(&search, &types, "title contains 'rust'", None)
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![rust.id.clone().unwrap()]);

    let page = t
        .index
        .search_ql(&search, &types, "title contains 'begin*'", None)
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![go.id.clone().unwrap()]);

    let page = t
        .index
        .search_ql(&search, &types, "title = 'learning*'", None)
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![rust.id.unwrap()]);
}

#[tokio::test]
async fn test_contains_on_number_is_unsupported() {
    let t = common::setup().await;
    let search = common::search_edge(&t.scope, "posts");
    let err = t
        .index
        .search_ql(&search, &SearchTypes::all(), "views contains 5", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::UnsupportedField { ref field, .. } if field == "views"));
    assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_query_is_a_parse_error() {
    let t = common::setup().await;
    let search = common::search_edge(&t.scope, "posts");
    let err = t
        .index
        .search_ql(&search, &SearchTypes::all(), "title = ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::QueryParse(_)));
}

#[tokio::test]
async fn test_tags_match_any_array_element() {
    let t = common::setup().await;
    let edge = common::collection_edge(&t.scope, "cars", 1000);
    let tagged = common::entity("car", json!({"tags": ["Fast", "Red"]}));
    let plain = common::entity("car", json!({"tags": ["slow"]}));
    common::index_all(&t.index, &edge, &[tagged.clone(), plain]).await;

    let page = t
        .index
        .search_ql(
            &common::search_edge(&t.scope, "cars"),
            &SearchTypes::all(),
            "tags = 'red'",
            None,
        )
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![tagged.id.unwrap()]);
}

#[tokio::test]
async fn test_numeric_ranges_and_boolean_logic() {
    let t = common::setup().await;
    let edge = common::collection_edge(&t.scope, "users", 1000);
    let young = common::entity("user", json!({"age": 17, "active": true}));
    let adult = common::entity("user", json!({"age": 30, "active": true}));
    let retired = common::entity("user", json!({"age": 70, "active": false}));
    common::index_all(&t.index, &edge, &[young.clone(), adult.clone(), retired.clone()]).await;

    let search = common::search_edge(&t.scope, "users");
    let types = SearchTypes::all();
    let ids = |page: edgeindex::CandidateResults| {
        let mut ids = page.ids();
        ids.sort();
        ids
    };
    let sorted = |mut v: Vec<edgeindex::EntityId>| {
        v.sort();
        v
    };

    let page = t
        .index
        .search_ql(&search, &types, "age >= 18 and active = true", None)
        .await
        .unwrap();
    assert_eq!(ids(page), vec![adult.id.clone().unwrap()]);

    let page = t
        .index
        .search_ql(&search, &types, "age < 18 or age > 65", None)
        .await
        .unwrap();
    assert_eq!(
        ids(page),
        sorted(vec![young.id.clone().unwrap(), retired.id.clone().unwrap()])
    );

    let page = t
        .index
        .search_ql(&search, &types, "not active = true", None)
        .await
        .unwrap();
    assert_eq!(ids(page), vec![retired.id.unwrap()]);
}

#[tokio::test]
async fn test_order_by_property() {
    let t = common::setup().await;
    let edge = common::collection_edge(&t.scope, "users", 1000);
    let b = common::entity("user", json!({"name": "b"}));
    let c = common::entity("user", json!({"name": "c"}));
    let a = common::entity("user", json!({"name": "a"}));
    common::index_all(&t.index, &edge, &[b.clone(), c.clone(), a.clone()]).await;

    let search = common::search_edge(&t.scope, "users");
    let page = t
        .index
        .search_ql(&search, &SearchTypes::all(), "select * order by name desc", None)
        .await
        .unwrap();
    assert_eq!(
        page.ids(),
        vec![c.id.unwrap(), b.id.unwrap(), a.id.unwrap()]
    );
}

#[tokio::test]
async fn test_geo_filter_applies_to_whole_query() {
    let t = common::setup().await;
    let edge = common::collection_edge(&t.scope, "stores", 1000);
    let near = common::entity(
        "store",
        json!({"kind": "cafe", "location": {"latitude": 37.7749, "longitude": -122.4194}}),
    );
    let near_other = common::entity(
        "store",
        json!({"kind": "bar", "location": {"latitude": 37.7750, "longitude": -122.4195}}),
    );
    let far = common::entity(
        "store",
        json!({"kind": "cafe", "location": {"latitude": 34.0522, "longitude": -118.2437}}),
    );
    common::index_all(&t.index, &edge, &[near.clone(), near_other, far]).await;

    // The distance filter is lifted out of the OR and applied to every hit.
    let page = t
        .index
        .search_ql(
            &common::search_edge(&t.scope, "stores"),
            &SearchTypes::all(),
            "kind = 'cafe' or location within 1000 of 37.7749, -122.4194",
            None,
        )
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![near.id.unwrap()]);
}

#[tokio::test]
async fn test_geo_results_sorted_by_distance() {
    let t = common::setup().await;
    let edge = common::collection_edge(&t.scope, "stores", 1000);
    let farther = common::entity(
        "store",
        json!({"location": {"latitude": 37.7800, "longitude": -122.4194}}),
    );
    let closest = common::entity(
        "store",
        json!({"location": {"latitude": 37.7750, "longitude": -122.4194}}),
    );
    common::index_all(&t.index, &edge, &[farther.clone(), closest.clone()]).await;

    let page = t
        .index
        .search_ql(
            &common::search_edge(&t.scope, "stores"),
            &SearchTypes::all(),
            "location within 5000 of 37.7749, -122.4194",
            None,
        )
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![closest.id.unwrap(), farther.id.unwrap()]);
}

#[tokio::test]
async fn test_types_and_edges_scope_results() {
    let t = common::setup().await;
    let users_edge = common::collection_edge(&t.scope, "things", 1000);
    let user = common::entity("user", json!({"name": "x"}));
    let car = common::entity("car", json!({"name": "x"}));
    common::index_all(&t.index, &users_edge, &[user.clone(), car.clone()]).await;
    let other_edge = common::collection_edge(&t.scope, "elsewhere", 1000);
    common::index_all(&t.index, &other_edge, &[common::entity("user", json!({"name": "x"}))]).await;

    let search = common::search_edge(&t.scope, "things");
    let page = t
        .index
        .search_ql(&search, &SearchTypes::from_types(["User"]), "name = 'x'", None)
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![user.id.unwrap()]);

    let page = t
        .index
        .search_ql(&search, &SearchTypes::all(), "name = 'x'", None)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn test_applications_are_isolated() {
    let t = common::setup().await;
    let other_scope = common::scope();
    let other = t.manager.entity_index(&other_scope);
    other.initialize().await.unwrap();

    let mine = common::entity("user", json!({"name": "same"}));
    common::index_all(&t.index, &common::collection_edge(&t.scope, "users", 1), &[mine.clone()]).await;
    common::index_all(
        &other,
        &common::collection_edge(&other_scope, "users", 1),
        &[common::entity("user", json!({"name": "same"}))],
    )
    .await;

    let page = t
        .index
        .search_ql(
            &common::search_edge(&t.scope, "users"),
            &SearchTypes::all(),
            "name = 'same'",
            None,
        )
        .await
        .unwrap();
    assert_eq!(page.ids(), vec![mine.id.unwrap()]);
}
