use crate::sql::ast::*;
use crate::sql::error::ParseError;
use crate::sql::parse;
use pretty_assertions::assert_eq;

fn kv(key: &str, value: &str) -> KeyValue {
    KeyValue::new(key, value)
}

#[test]
fn test_insert_pairs() {
    let stmt = parse("INSERT (key1, value1), (key2,value2) INTO users").unwrap();
    assert_eq!(
        stmt,
        Statement::Insert {
            table: "users".into(),
            pairs: vec![kv("key1", "value1"), kv("key2", "value2")],
        }
    );
}

#[test]
fn test_select_star() {
    let stmt = parse("SELECT * FROM users").unwrap();
    assert_eq!(
        stmt,
        Statement::Select {
            table: "users".into(),
            keys: vec![],
        }
    );
}

#[test]
fn test_select_keys() {
    let stmt = parse("select a, b,c from users;").unwrap();
    assert_eq!(
        stmt,
        Statement::Select {
            table: "users".into(),
            keys: vec!["a".into(), "b".into(), "c".into()],
        }
    );
}

#[test]
fn test_update() {
    let stmt = parse("UPDATE users SET (k1, v2), (k3, v4)").unwrap();
    assert_eq!(
        stmt,
        Statement::Update {
            table: "users".into(),
            pairs: vec![kv("k1", "v2"), kv("k3", "v4")],
        }
    );
}

#[test]
fn test_delete_keys() {
    let stmt = parse("DELETE k1, k2 FROM users").unwrap();
    assert_eq!(
        stmt,
        Statement::Delete {
            table: "users".into(),
            keys: vec!["k1".into(), "k2".into()],
        }
    );
}

#[test]
fn test_drop_with_and_without_table_keyword() {
    let expected = Statement::Drop {
        table: "users".into(),
    };
    assert_eq!(parse("DROP users").unwrap(), expected);
    assert_eq!(parse("DROP TABLE users").unwrap(), expected);
    assert_eq!(parse("drop table users;").unwrap(), expected);
}

#[test]
fn test_transaction_control() {
    assert_eq!(parse("BEGIN").unwrap(), Statement::Begin);
    assert_eq!(parse("commit;").unwrap(), Statement::Commit);
    assert_eq!(parse("  Rollback  ").unwrap(), Statement::Rollback);
}

#[test]
fn test_identifiers_keep_case() {
    let stmt = parse("insert (Key, Value) into MyTable").unwrap();
    assert_eq!(stmt.table(), Some("MyTable"));
    match stmt {
        Statement::Insert { pairs, .. } => assert_eq!(pairs, vec![kv("Key", "Value")]),
        other => panic!("Expected insert statement, got {:?}", other),
    }
}

#[test]
fn test_empty_input() {
    assert_eq!(parse(""), Err(ParseError::EmptyInput));
    assert_eq!(parse("   "), Err(ParseError::EmptyInput));
}

#[test]
fn test_unsupported_statement() {
    assert_eq!(
        parse("CREATE TABLE users"),
        Err(ParseError::UnsupportedStatement("CREATE".into()))
    );
}

#[test]
fn test_invalid_syntax() {
    let cases = [
        "INSERT INTO mytable",
        "INSERT (k,v) FROM mytable",
        "INSERT (k v) INTO mytable",
        "INSERT (k, hello world) INTO mytable",
        "SELECT key1 FROM",
        "SELECT FROM mytable",
        "DELETE FROM mytable",
        "DELETE k1 mytable",
        "DROP",
        "UPDATE mytable SET",
        "UPDATE mytable (k,v)",
    ];

    for input in cases {
        assert!(
            matches!(parse(input), Err(ParseError::UnexpectedToken { .. })),
            "Expected syntax error for {:?}, got {:?}",
            input,
            parse(input)
        );
    }
}

#[test]
fn test_trailing_tokens_rejected() {
    assert!(matches!(
        parse("SELECT * FROM users WHERE k = 1"),
        Err(ParseError::TrailingInput(_))
    ));
    assert!(matches!(parse("BEGIN; COMMIT"), Err(ParseError::TrailingInput(_))));
    assert!(matches!(parse("DROP TABLE a b"), Err(ParseError::TrailingInput(_))));
}

#[test]
fn test_error_message() {
    let err = parse("SELECT key1 FROM").unwrap_err();
    assert_eq!(err.to_string(), "expected table name, found end of input");
}

#[test]
fn test_statement_helpers() {
    let select = parse("SELECT a FROM t").unwrap();
    assert!(select.is_read_only());
    assert_eq!(select.table(), Some("t"));

    for input in ["INSERT (a, 1) INTO t", "UPDATE t SET (a, 2)", "DELETE a FROM t", "DROP t"] {
        let stmt = parse(input).unwrap();
        assert!(!stmt.is_read_only(), "{input} writes");
        assert_eq!(stmt.table(), Some("t"));
    }

    let begin = parse("BEGIN").unwrap();
    assert!(!begin.is_read_only());
    assert_eq!(begin.table(), None);
}
