//! Query combinator tests: typed fetches, strategies, and cleanup.

mod support;

use futures_util::StreamExt;
use horn_clause::{Declaration, Literal, Node};
use horn_session::{Query, SessionError, SessionState, Strategy};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use support::{FALSE, STOPPED, TRUE, connect};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
struct Person {
    name: String,
    age: i64,
}

fn person(name: &str, age: i64) -> Person {
    Person {
        name: name.to_string(),
        age,
    }
}

const PERSON_QUERY: &str = "person(NAME, AGE).";
const ANDREW: &str = "NAME = \"andrew\",\r\nAGE = 12 ";
const ALICE: &str = "NAME = \"alice\",\r\nAGE = 33 ";
const BOB_LAST: &str = "NAME = \"bob\",\r\nAGE = 73.\r\n\r\n?- ";

#[tokio::test]
async fn test_fetch_streams_typed_records() {
    let (mut session, engine) = connect(&[
        (PERSON_QUERY, ANDREW),
        (";", ALICE),
        (";", BOB_LAST),
    ])
    .await;

    let query = Query::new("person(NAME, AGE)").into_record::<Person>();
    let mut fetch = query.fetch(&mut session).await.unwrap();
    let mut people = Vec::new();
    while let Some(p) = fetch.next().await.unwrap() {
        people.push(p);
    }
    drop(fetch);

    assert_eq!(
        people,
        vec![person("andrew", 12), person("alice", 33), person("bob", 73)]
    );
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(engine.finish().await, vec![PERSON_QUERY, ";", ";"]);
}

#[tokio::test]
async fn test_fetch_stream_adapter() {
    let (mut session, engine) = connect(&[
        (PERSON_QUERY, ANDREW),
        (";", BOB_LAST),
    ])
    .await;

    let query = Query::new("person(NAME, AGE)").into_record::<Person>();
    let people: Vec<Person> = query
        .fetch(&mut session)
        .await
        .unwrap()
        .into_stream()
        .map(|r| r.unwrap())
        .collect()
        .await;

    assert_eq!(people, vec![person("andrew", 12), person("bob", 73)]);
    engine.finish().await;
}

#[tokio::test]
async fn test_fetch_on_boolean_query_is_shape_error() {
    let (mut session, engine) = connect(&[]).await;

    let query = Query::new(r#"person("andrew", 12)"#);
    let err = query.fetch(&mut session).await.unwrap_err();
    assert!(matches!(err, SessionError::Shape(_)), "{err:?}");
    let err = query.fetchall(&mut session).await.unwrap_err();
    assert!(err.is_shape_error());

    assert!(engine.finish().await.is_empty());
}

#[tokio::test]
async fn test_prove_is_the_boolean_form() {
    let (mut session, engine) = connect(&[
        (r#"person("andrew", 12)."#, TRUE),
        (r#"person("andrew", 13)."#, FALSE),
    ])
    .await;

    assert!(Query::new(r#"person("andrew", 12)"#).prove(&mut session).await.unwrap());
    assert!(!Query::new(r#"person("andrew", 13)"#).prove(&mut session).await.unwrap());
    engine.finish().await;
}

#[tokio::test]
async fn test_fetchone_twice_reproduces_first_row() {
    let (mut session, engine) = connect(&[
        (PERSON_QUERY, ANDREW),
        (".", STOPPED),
        (PERSON_QUERY, ANDREW),
        (".", STOPPED),
    ])
    .await;

    let query = Query::new("person(NAME, AGE)").into_record::<Person>();
    let first = query.fetchone(&mut session).await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    let second = query.fetchone(&mut session).await.unwrap();

    assert_eq!(first, Some(person("andrew", 12)));
    assert_eq!(first, second);
    assert_eq!(
        engine.finish().await,
        vec![PERSON_QUERY, ".", PERSON_QUERY, "."]
    );
}

#[tokio::test]
async fn test_fetchone_without_solutions() {
    let (mut session, engine) = connect(&[("person(NAME, 99).", FALSE)]).await;

    let query = Query::new("person(NAME, 99)");
    assert!(query.fetchone(&mut session).await.unwrap().is_none());
    assert_eq!(session.state(), SessionState::Ready);
    engine.finish().await;
}

#[tokio::test]
async fn test_streaming_and_aggregate_yield_same_rows() {
    let (mut session, engine) = connect(&[
        (PERSON_QUERY, ANDREW),
        (";", ALICE),
        (";", BOB_LAST),
        (
            "bagof([NAME,AGE], person(NAME, AGE), L).",
            "L = [[\"bob\", 73], [\"andrew\", 12], [\"alice\", 33]].\r\n\r\n?- ",
        ),
    ])
    .await;

    let streaming = Query::new("person(NAME, AGE)").into_record::<Person>();
    let aggregate = streaming.clone().with_strategy(Strategy::Aggregate);
    assert_eq!(streaming.strategy(), Strategy::Streaming);

    let mut streamed = streaming.fetchall(&mut session).await.unwrap();
    let mut collected = aggregate.fetchall(&mut session).await.unwrap();
    streamed.sort();
    collected.sort();
    assert_eq!(streamed, collected);
    assert_eq!(streamed.len(), 3);
    engine.finish().await;
}

#[tokio::test]
async fn test_filter_merges_prebound_fields() {
    let (mut session, engine) = connect(&[
        (r#"person("andrew", AGE)."#, "AGE = 12.\r\n\r\n?- "),
        (
            r#"bagof(AGE, person("andrew", AGE), L)."#,
            "L = [12].\r\n\r\n?- ",
        ),
    ])
    .await;

    let decl = Declaration::fact("person", ["name", "age"]).unwrap();
    let query = Query::filter(&decl, [("name", Literal::from("andrew"))])
        .unwrap()
        .into_record::<Person>();

    let people = query.fetchall(&mut session).await.unwrap();
    assert_eq!(people, vec![person("andrew", 12)]);

    let people = query
        .with_strategy(Strategy::Aggregate)
        .fetchall(&mut session)
        .await
        .unwrap();
    assert_eq!(people, vec![person("andrew", 12)]);
    engine.finish().await;
}

#[tokio::test]
async fn test_composed_query_from_tree() {
    let (mut session, engine) = connect(&[(
        "person(NAME, AGE), AGE > 60.",
        "NAME = \"bob\",\r\nAGE = 73.\r\n\r\n?- ",
    )])
    .await;

    let node = Node::call("person", [Node::var("name"), Node::var("age")]);
    let query = Query::goal(&node)
        .unwrap()
        .and(Query::goal(&Node::var("age").gt(60)).unwrap())
        .unwrap()
        .into_record::<Person>();

    let people = query.fetchall(&mut session).await.unwrap();
    assert_eq!(people, vec![person("bob", 73)]);
    engine.finish().await;
}

#[tokio::test]
async fn test_row_not_matching_record_is_reported() {
    let (mut session, engine) = connect(&[
        ("person(NAME).", "NAME = \"andrew\" "),
        (".", STOPPED),
    ])
    .await;

    let query = Query::new("person(NAME)").into_record::<Person>();
    let err = query.fetchone(&mut session).await.unwrap_err();
    assert!(matches!(err, SessionError::Record(_)), "{err:?}");

    // Backtracking was still stopped.
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(engine.finish().await, vec!["person(NAME).", "."]);
}

#[tokio::test]
async fn test_truncated_aggregate_is_decode_error() {
    let (mut session, engine) = connect(&[(
        "bagof(X, big(X), L).",
        "L = [1, 2, 3|...].\r\n\r\n?- ",
    )])
    .await;

    let err = Query::new("big(X)")
        .with_strategy(Strategy::Aggregate)
        .fetchall(&mut session)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Decode { .. }), "{err:?}");
    assert_eq!(session.state(), SessionState::Ready);
    engine.finish().await;
}
