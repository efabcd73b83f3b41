use billing_partition::categorize::CategoryTable;
use billing_partition::processing::cross_validate;
use billing_partition::types::{Table, Value};
use billing_partition::EngineError;

fn column(name: &str, values: &[&str]) -> Table {
    Table::new(
        &[name],
        values
            .iter()
            .map(|v| {
                if v.is_empty() {
                    vec![Value::Null]
                } else {
                    vec![Value::Utf8(v.to_string())]
                }
            })
            .collect(),
    )
}

#[test]
fn membership_ignores_case_and_surrounding_whitespace() {
    let query = column("usuario", &["dr. ana", "luis", "", "EVA"]);
    let crystal = column("usuario validador", &["  Dr. Ana ", "eva", "eva", ""]);
    let cv = cross_validate(&query, "usuario", &crystal, "usuario validador", "en_crystal").unwrap();

    let flags: Vec<&Value> = cv.table.rows.iter().map(|r| &r[1]).collect();
    assert_eq!(
        flags,
        vec![&Value::Bool(true), &Value::Bool(false), &Value::Bool(false), &Value::Bool(true)]
    );
    assert_eq!(cv.counts.members, 2);
    assert_eq!(cv.counts.non_members, 2);
    assert_eq!(cv.counts.members + cv.counts.non_members, query.row_count());
}

#[test]
fn source_rows_are_preserved_in_order() {
    let query = Table::new(
        &["usuario", "servicio"],
        vec![
            vec![Value::Utf8("b".to_string()), Value::Utf8("RX".to_string())],
            vec![Value::Utf8("a".to_string()), Value::Int64(7)],
        ],
    );
    let crystal = column("usuario", &["a"]);
    let cv = cross_validate(&query, "usuario", &crystal, "usuario", "en_crystal").unwrap();
    assert_eq!(cv.table.columns, vec!["usuario", "servicio", "en_crystal"]);
    assert_eq!(cv.table.rows[0][..2], query.rows[0][..]);
    assert_eq!(cv.table.rows[1][1], Value::Int64(7));
}

#[test]
fn empty_reference_table_flags_nothing() {
    let query = column("usuario", &["ana", "luis"]);
    let crystal = Table::new(&["usuario"], vec![]);
    let cv = cross_validate(&query, "usuario", &crystal, "usuario", "en_crystal").unwrap();
    assert_eq!(cv.counts.members, 0);
    assert_eq!(cv.counts.total, 2);
    assert_eq!(cv.identities.non_members, 2);
}

#[test]
fn unknown_identity_column_is_an_input_error() {
    let query = column("usuario", &["ana"]);
    let err = cross_validate(&query, "usuario", &query, "dni", "en_crystal").unwrap_err();
    match &err {
        EngineError::MissingColumn { column, available } => {
            assert_eq!(column, "dni");
            assert_eq!(available, &vec!["usuario".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), 400);
}

#[test]
fn categorizer_first_match_wins() {
    let cats = CategoryTable::from_pairs(&[("A", &["x"]), ("B", &["xy"])], "other");
    assert_eq!(cats.categorize("xy service"), "A");
    assert_eq!(cats.categorize("  XY  "), "A");
    assert_eq!(cats.categorize("zzz"), "other");
}
