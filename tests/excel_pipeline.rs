#![cfg(feature = "excel")]

use std::sync::Arc;

use billing_partition::artifact::{ArtifactFormat, ArtifactStore, MemoryArtifactStore};
use billing_partition::config::EngineConfig;
use billing_partition::ingestion::excel::ingest_excel_from_bytes;
use billing_partition::ingestion::{ingest_bytes, IngestionOptions, TableSource};
use billing_partition::jobs::JobRegistry;
use billing_partition::pipeline::Pipeline;
use billing_partition::types::Value;

fn crystal_xlsx() -> Vec<u8> {
    use rust_xlsxwriter::Workbook;

    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    ws.set_name("Reporte").unwrap();

    // header starts on the third row
    ws.write_string(2, 0, "Médico").unwrap();
    ws.write_string(2, 1, "Prestación").unwrap();
    ws.write_string(2, 2, "Usuario").unwrap();
    ws.write_string(2, 3, "Cantidad").unwrap();

    let rows = [
        ("Ana", "Ecografia Renal", "jgomez", 1.0),
        ("Ana", "RX Torax", "jgomez", 2.0),
        ("Luis", "Mamografia", "mrojas", 1.0),
    ];
    for (i, (prof, serv, user, qty)) in rows.iter().enumerate() {
        let r = 3 + i as u32;
        ws.write_string(r, 0, *prof).unwrap();
        ws.write_string(r, 1, *serv).unwrap();
        ws.write_string(r, 2, *user).unwrap();
        ws.write_number(r, 3, *qty).unwrap();
    }
    wb.save_to_buffer().unwrap()
}

fn query_xlsx() -> Vec<u8> {
    use rust_xlsxwriter::Workbook;

    let mut wb = Workbook::new();
    let ws = wb.add_worksheet();
    ws.write_string(0, 0, "Servicio").unwrap();
    ws.write_string(0, 1, "Usuario").unwrap();
    ws.write_string(1, 0, "Ecografia").unwrap();
    ws.write_string(1, 1, "JGOMEZ").unwrap();
    ws.write_string(2, 0, "Biopsia").unwrap();
    ws.write_string(2, 1, "cfuentes").unwrap();
    wb.save_to_buffer().unwrap()
}

#[test]
fn header_is_the_first_non_empty_row() {
    let t = ingest_bytes(
        &TableSource::new("crystal.xlsx", crystal_xlsx()),
        &IngestionOptions::default(),
    )
    .unwrap();
    assert_eq!(t.columns, vec!["médico", "prestación", "usuario", "cantidad"]);
    assert_eq!(t.row_count(), 3);
    assert_eq!(t.rows[1][3], Value::Float64(2.0));
}

#[test]
fn workbook_run_writes_xlsx_artifacts() {
    let store = Arc::new(MemoryArtifactStore::new(ArtifactFormat::Xlsx));
    let pipeline = Pipeline::new(EngineConfig::default(), store.clone()).unwrap();
    let job = JobRegistry::new().start();

    let out = pipeline
        .run_sources(
            &job,
            &TableSource::new("crystal.xlsx", crystal_xlsx()),
            &TableSource::new("query.xlsx", query_xlsx()),
        )
        .unwrap();
    let report = out.report().unwrap();

    assert_eq!(report.crystal.mapping.column("professional"), Some("médico"));
    assert_eq!(report.crystal.mapping.column("service"), Some("prestación"));
    assert_eq!(report.query.mapping.column("user"), Some("usuario"));
    assert_eq!(report.professionals, vec!["Ana", "Luis"]);
    assert_eq!(report.query.summary.categories.get("otros"), 1);

    let ana = report.crystal_partition("ana").unwrap();
    assert!(ana.artifact.name.ends_with(".xlsx"));
    let bytes = store.get(&ana.artifact.name).unwrap();
    let back = ingest_excel_from_bytes(&ana.artifact.name, &bytes, None).unwrap();
    assert_eq!(back.row_count(), 2);
    assert_eq!(back.rows[0][0], Value::Utf8("Ana".to_string()));
    assert_eq!(back.rows[1][3], Value::Float64(2.0));

    let v = report.validation.as_ref().unwrap();
    assert_eq!(v.rows.members, 1);
    let bytes = store.get(&v.artifact.name).unwrap();
    let flagged = ingest_excel_from_bytes(&v.artifact.name, &bytes, None).unwrap();
    assert_eq!(flagged.columns, vec!["servicio", "usuario", "en_crystal"]);
    assert_eq!(flagged.rows[0][2], Value::Bool(true));
    assert_eq!(flagged.rows[1][2], Value::Bool(false));
}

#[test]
fn selected_sheet_is_read() {
    use rust_xlsxwriter::Workbook;

    let mut wb = Workbook::new();
    wb.add_worksheet().write_string(0, 0, "ignorada").unwrap();
    let ws = wb.add_worksheet();
    ws.set_name("Datos").unwrap();
    ws.write_string(0, 0, "Profesional").unwrap();
    ws.write_string(1, 0, "Ana").unwrap();
    let bytes = wb.save_to_buffer().unwrap();

    let opts = IngestionOptions {
        sheet: Some("Datos".to_string()),
        ..IngestionOptions::default()
    };
    let t = ingest_bytes(&TableSource::new("multi.xlsx", bytes), &opts).unwrap();
    assert_eq!(t.columns, vec!["profesional"]);
    assert_eq!(t.row_count(), 1);
}
