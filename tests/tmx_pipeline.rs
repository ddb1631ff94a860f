//! Library-level pipeline: write TMX → import → query → export → read back.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use tm_engine::config::Config;
use tm_engine::export::{ExportRequest, TmExport};
use tm_engine::import::run_import;
use tm_engine::models::{LangPair, TranslationUnit};
use tm_engine::progress::NoProgress;
use tm_engine::query::{QueryOrchestrator, QueryOutcome, QueryParams};
use tm_engine::store::{CandidateStore, InMemoryStore};
use tm_engine::tmx::{ParseOptions, TmxReader, TmxWriter, WriterOptions};

fn pair() -> LangPair {
    LangPair::new("en", "es")
}

fn corpus() -> Vec<TranslationUnit> {
    [
        ("The contract is void", "El contrato es nulo", "Legal"),
        ("The contract is valid", "El contrato es válido", "Legal"),
        ("Take two tablets daily", "Tome dos comprimidos al día", "Medical"),
        ("Fish & chips", "Pescado y patatas", "Food"),
    ]
    .into_iter()
    .map(|(src, tgt, domain)| {
        let mut u = TranslationUnit::new(src, tgt, &pair());
        u.file_name = Some(format!("{}.docx", domain.to_lowercase()));
        u.tuid = Some(src.len().to_string());
        u
    })
    .collect()
}

fn write_archive(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("memory.zip");
    let mut file = File::create(&path).unwrap();
    let options = WriterOptions::new("en")
        .with_creation_date(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    let mut writer = TmxWriter::new(options);
    let all = corpus();
    let (first, second) = all.split_at(2);
    for chunk in writer.write_iter(first.to_vec(), Some("part1.tmx")) {
        file.write_all(&chunk.unwrap()).unwrap();
    }
    for chunk in writer.write_iter(second.to_vec(), Some("part2.tmx")) {
        file.write_all(&chunk.unwrap()).unwrap();
    }
    for chunk in writer.write_close() {
        file.write_all(&chunk.unwrap()).unwrap();
    }
    path
}

#[test]
fn test_written_archive_reads_back() {
    let dir = TempDir::new().unwrap();
    let path = write_archive(&dir);

    let reader = TmxReader::new(&path);
    assert_eq!(reader.language_pairs().unwrap(), vec![pair()]);

    let units: Vec<_> = reader.parse().unwrap().collect();
    let expected = corpus();
    assert_eq!(units.len(), expected.len());
    for (got, want) in units.iter().zip(&expected) {
        assert_eq!(got.source_text, want.source_text);
        assert_eq!(got.target_text, want.target_text);
        assert_eq!(got.source_language, want.source_language);
        assert_eq!(got.target_language, want.target_language);
        assert_eq!(got.file_name, want.file_name);
        assert_eq!(got.tuid, want.tuid);
    }
}

#[tokio::test]
async fn test_import_query_export() {
    let dir = TempDir::new().unwrap();
    let path = write_archive(&dir);

    let store = Arc::new(InMemoryStore::new());
    let summary = run_import(
        store.as_ref(),
        &path,
        ParseOptions::default().with_domain("Imported"),
        3,
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(summary.units_stored, 4);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.parse.documents, 2);

    let mut config = Config::default();
    config.export.path = dir.path().join("exports");

    let orchestrator = QueryOrchestrator::new(
        store.clone(),
        config.query.clone(),
        config.scoring(),
    );
    let params = QueryParams::single("The contract is void", pair());
    let outcome = orchestrator
        .query_one("The contract is void", &params)
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::Exact(ref r) if r.tm_tgt == "El contrato es nulo"));

    let reversed = QueryParams::single("El contrato es válido", pair().reversed());
    let results = orchestrator.query(&reversed).await.unwrap();
    assert_eq!(
        results[0].as_ref().map(|r| r.tm_tgt.as_str()),
        Some("The contract is valid")
    );

    let names = store
        .file_names(&pair(), &Default::default())
        .await
        .unwrap();
    assert_eq!(names, vec!["food.docx", "legal.docx", "medical.docx"]);

    let export = TmExport::new(store, &config);
    let mut request = ExportRequest::new(pair(), "tester");
    request.domains = vec!["Imported".into()];
    let record = export.run(&request, &NoProgress).unwrap();
    assert_eq!(record.member, "Imported.tmx");
    assert_eq!(record.units, 4);

    let back: Vec<_> = TmxReader::new(&record.path).parse().unwrap().collect();
    assert_eq!(back.len(), 4);
    assert_eq!(back[3].source_text, "Fish & chips");
    assert_eq!(back[3].file_name.as_deref(), Some("food.docx"));
}
