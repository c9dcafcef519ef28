//! Integration tests for the table consolidation pipeline

use std::sync::Arc;
use std::time::Duration;
use table_consolidator::caption::{TitleSource, UNTITLED};
use table_consolidator::linker::{RelationKind, Relationship};
use table_consolidator::merge::merge_tables;
use table_consolidator::session::FailureKind;
use table_consolidator::source::FeedFile;
use table_consolidator::validator::Anomaly;
use table_consolidator::{
    consolidate, consolidate_feeds, table_to_markdown, CandidateSource, CanonicalTable, CellValue,
    DocumentInput, DocumentOutcome, DocumentResult, ExtractionConfig, ExtractionSession,
    Extractor, PatternMemory, Region, SourceError, SpanPlacement, TableCandidate, TextSpan,
    TimeoutSource,
};

// Helper to build candidates the way a page analyzer would emit them
fn make_candidate(
    id: &str,
    page: u32,
    headers: &[&str],
    rows: Vec<Vec<CellValue>>,
    confidence: f32,
    spans: Vec<TextSpan>,
) -> TableCandidate {
    TableCandidate {
        id: id.to_string(),
        region: Region::new(page, 0),
        raw_headers: headers.iter().map(|h| h.to_string()).collect(),
        raw_rows: rows,
        detector_confidence: confidence,
        nearby_text_spans: spans,
    }
}

fn row(cells: &[&str]) -> Vec<CellValue> {
    cells.iter().map(|c| CellValue::text(*c)).collect()
}

fn caption(text: &str) -> TextSpan {
    TextSpan::new(text, SpanPlacement::Above, 12.0, 2)
}

fn cost_rows(start: usize, count: usize) -> Vec<Vec<CellValue>> {
    (start..start + count)
        .map(|i| row(&[&i.to_string(), &format!("Task {i} field work"), "$12,500"]))
        .collect()
}

const COST_HEADERS: [&str; 3] = ["Task No.", "Description", "Totals (CAD$)"];

fn only_table(result: &DocumentResult) -> &CanonicalTable {
    assert!(result.is_complete(), "document did not complete: {:?}", result.outcome);
    assert_eq!(result.tables().len(), 1);
    &result.tables()[0]
}

struct BrokenFeed;

impl CandidateSource for BrokenFeed {
    fn fetch(&self) -> Result<Vec<TableCandidate>, SourceError> {
        Err(SourceError::Unavailable("renderer crashed".into()))
    }
}

struct StalledFeed;

impl CandidateSource for StalledFeed {
    fn fetch(&self) -> Result<Vec<TableCandidate>, SourceError> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(Vec::new())
    }
}

// ============================================================================
// End-to-end Scenarios
// ============================================================================

#[test]
fn test_explicit_caption_accepted() {
    let candidate = make_candidate(
        "p1-t1",
        1,
        &COST_HEADERS,
        cost_rows(1, 5),
        1.0,
        vec![caption("Table 1: Summary of Project Costs by Task")],
    );
    let result = consolidate("proposal.pdf", vec![candidate]);
    let table = only_table(&result);

    assert_eq!(table.title, "Table 1: Summary of Project Costs by Task");
    assert_eq!(table.title_source, TitleSource::ExplicitCaption);
    assert_eq!(table.title_confidence, 1.0);
    assert_eq!(table.data.len(), 5);
    assert!(table.anomalies.is_empty());
    assert_eq!(table.section, "Financial Summary");
    assert_eq!(result.metrics().unwrap().accepted, 1);
}

#[test]
fn test_phone_number_never_becomes_title() {
    let candidate = make_candidate(
        "p1-t1",
        1,
        &COST_HEADERS,
        cost_rows(1, 5),
        1.0,
        vec![TextSpan::new("+1 604 681 4196 office", SpanPlacement::Above, 8.0, 6)],
    );
    let result = consolidate("proposal.pdf", vec![candidate]);
    let table = only_table(&result);

    assert_eq!(table.title, UNTITLED);
    assert_eq!(table.title_source, TitleSource::None);
    assert_eq!(table.title_confidence, 0.0);
}

#[test]
fn test_low_confidence_candidate_excluded() {
    let candidate = make_candidate(
        "p1-t1",
        1,
        &COST_HEADERS,
        cost_rows(1, 5),
        0.80,
        vec![caption("Table 1: Costs")],
    );
    let result = consolidate("proposal.pdf", vec![candidate]);

    assert!(result.is_complete());
    assert!(result.tables().is_empty());
    let metrics = result.metrics().unwrap();
    assert_eq!(metrics.rejected, 1);
    assert_eq!(metrics.acceptance_rate, 0.0);
}

#[test]
fn test_page_break_continuation_merged() {
    let first = make_candidate(
        "p3-t1",
        3,
        &COST_HEADERS,
        cost_rows(1, 6),
        0.99,
        vec![caption("Table 2: Project Budget by Task")],
    );
    let second = make_candidate(
        "p4-t1",
        4,
        &COST_HEADERS,
        cost_rows(7, 4),
        0.99,
        vec![],
    );
    let result = consolidate("proposal.pdf", vec![first, second]);
    let table = only_table(&result);

    assert_eq!(table.merged_from, vec!["p3-t1".to_string(), "p4-t1".to_string()]);
    assert_eq!(table.first_page, 3);
    assert_eq!(table.last_page, 4);
    assert_eq!(table.data.len(), 10);
    assert_eq!(table.title, "Table 2: Project Budget by Task");
    assert!(table_to_markdown(table).starts_with("### Table 2: Project Budget by Task (pp. 3-4)"));
}

#[test]
fn test_numbered_tables_across_page_break_stay_apart() {
    let first = make_candidate(
        "p3-t1",
        3,
        &COST_HEADERS,
        cost_rows(1, 6),
        0.99,
        vec![caption("Table 2: Project Budget by Task")],
    );
    let second = make_candidate(
        "p4-t1",
        4,
        &COST_HEADERS,
        cost_rows(7, 4),
        0.99,
        vec![caption("Table 3: Optional Services by Task")],
    );
    let result = consolidate("proposal.pdf", vec![first, second]);

    let titles: Vec<&str> = result.tables().iter().map(|t| t.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Table 2: Project Budget by Task", "Table 3: Optional Services by Task"]
    );
    assert_eq!(result.tables()[0].data.len(), 6);
    assert_eq!(result.tables()[1].data.len(), 4);
}

#[test]
fn test_caption_with_address_words_accepted() {
    let candidate = make_candidate(
        "p2-t1",
        2,
        &COST_HEADERS,
        cost_rows(1, 5),
        1.0,
        vec![
            TextSpan::new("Suite 400, 1055 West Georgia Street", SpanPlacement::Above, 40.0, 3),
            caption("Table 3: Street Lighting Costs"),
        ],
    );
    let result = consolidate("proposal.pdf", vec![candidate]);
    let table = only_table(&result);

    assert_eq!(table.title, "Table 3: Street Lighting Costs");
    assert_eq!(table.title_source, TitleSource::ExplicitCaption);
    assert_eq!(table.title_confidence, 1.0);
    assert_eq!(table.label.as_deref(), Some("3"));
}

#[test]
fn test_short_rows_padded() {
    let mut rows = cost_rows(1, 7);
    for i in 8..=10 {
        rows.push(row(&[&i.to_string(), "Contingency"]));
    }
    let candidate = make_candidate("p2-t1", 2, &COST_HEADERS, rows, 1.0, vec![caption("Table 3: Costs")]);
    let result = consolidate("proposal.pdf", vec![candidate]);
    let table = only_table(&result);

    assert!(table.data.iter().all(|r| r.len() == table.column_count));
    let padded = table
        .anomalies
        .iter()
        .filter(|a| matches!(a, Anomaly::PaddedRow { .. }))
        .count();
    assert_eq!(padded, 3);
    assert_eq!(result.metrics().unwrap().repaired, 1);
}

#[test]
fn test_empty_document() {
    let result = consolidate("blank.pdf", Vec::new());
    assert!(result.is_complete());
    assert!(result.tables().is_empty());
    assert_eq!(result.metrics().unwrap().candidates, 0);
}

// ============================================================================
// Pipeline Properties
// ============================================================================

fn make_report_document() -> Vec<TableCandidate> {
    let mut labour_rows = vec![row(&["Engineer", "$150"]), row(&["Technician", "$95"])];
    labour_rows.push(row(&["(1) Rates from Table 1 apply to all tasks"]));

    vec![
        make_candidate(
            "p1-t1",
            1,
            &COST_HEADERS,
            cost_rows(1, 4),
            1.0,
            vec![caption("Table 1: Summary of Project Costs by Task")],
        ),
        make_candidate(
            "p2-t1",
            2,
            &["Milestone", "Date", "Payment"],
            vec![
                row(&["Kick-off", "2024-01-15", "$20,000"]),
                row(&["Final report", "2024-06-30", "$40,000"]),
            ],
            1.0,
            vec![caption("Table 2: Summary of Project Costs by Milestone")],
        ),
        make_candidate(
            "p5-t1",
            5,
            &["Role", "Hourly Rate"],
            labour_rows,
            1.0,
            vec![caption("Table 3: Labour Rates")],
        ),
    ]
}

#[test]
fn test_relationships_are_symmetric() {
    let result = consolidate("proposal.pdf", make_report_document());
    let tables = result.tables();
    assert_eq!(tables.len(), 3);

    for table in tables {
        for rel in &table.relationships {
            assert_ne!(rel.table_id, table.table_id);
            let other = tables.iter().find(|t| t.table_id == rel.table_id).unwrap();
            assert!(other.relationships.contains(&Relationship {
                table_id: table.table_id,
                kind: rel.kind,
            }));
        }
    }

    let first = &tables[0];
    assert!(first.relationships.contains(&Relationship {
        table_id: 2,
        kind: RelationKind::LexicalOverlap,
    }));
    assert!(first.relationships.contains(&Relationship {
        table_id: 2,
        kind: RelationKind::SharedSection,
    }));
    assert!(first.relationships.contains(&Relationship {
        table_id: 3,
        kind: RelationKind::ExplicitReference,
    }));
    assert_eq!(tables[2].notes.len(), 1);
}

#[test]
fn test_context_capture_off_skips_edges() {
    let config = ExtractionConfig {
        capture_context: false,
        enable_learning: false,
        ..Default::default()
    };
    let result = ExtractionSession::new("proposal.pdf", &config).run(&make_report_document());
    assert!(result.tables().iter().all(|t| t.relationships.is_empty()));
    assert_eq!(result.tables()[0].section, "Financial Summary");
}

#[test]
fn test_merge_is_idempotent() {
    let first = make_candidate("a", 3, &COST_HEADERS, cost_rows(1, 3), 1.0, vec![caption("Table 4: Costs")]);
    let second = make_candidate("b", 4, &COST_HEADERS, cost_rows(4, 3), 1.0, vec![]);
    let result = consolidate("doc.pdf", vec![first, second]);
    let tables = result.tables().to_vec();

    let again = merge_tables(tables.clone(), &ExtractionConfig::default().merge);
    assert_eq!(again, tables);
}

#[test]
fn test_extraction_is_deterministic() {
    let first = consolidate("proposal.pdf", make_report_document());
    let second = consolidate("proposal.pdf", make_report_document());
    assert_eq!(first, second);
}

#[test]
fn test_result_json_round_trip() {
    let result = consolidate("proposal.pdf", make_report_document());
    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains(r#""status":"complete""#));
    let back: DocumentResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}

// ============================================================================
// Failure Handling
// ============================================================================

#[test]
fn test_broken_feed_fails_document_only() {
    let mut extractor = Extractor::new(ExtractionConfig::default());
    let report = extractor.extract_batch(&[
        DocumentInput::new("good.pdf", make_report_document()),
        DocumentInput::new("bad.pdf", BrokenFeed),
    ]);

    assert_eq!(report.documents[0].tables().len(), 3);
    match &report.documents[1].outcome {
        DocumentOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::SourceUnavailable),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(extractor.stats().documents_failed, 1);
}

#[test]
fn test_stalled_feed_times_out() {
    let config = ExtractionConfig::default();
    let source = TimeoutSource::new(StalledFeed, Duration::from_millis(20));
    let result = ExtractionSession::new("slow.pdf", &config).run(&source);
    match result.outcome {
        DocumentOutcome::Failed { kind, message } => {
            assert_eq!(kind, FailureKind::SourceUnavailable);
            assert!(message.contains("timed out"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

// ============================================================================
// Pattern Memory
// ============================================================================

#[test]
fn test_shared_memory_across_batch() {
    let memory = Arc::new(PatternMemory::new());
    let mut extractor = Extractor::with_memory(ExtractionConfig::default(), Arc::clone(&memory));
    let inputs: Vec<DocumentInput> = (0..6)
        .map(|i| {
            let candidate = make_candidate(
                &format!("d{i}"),
                1,
                &COST_HEADERS,
                cost_rows(1, 4),
                1.0,
                vec![caption("Table 1: Costs")],
            );
            DocumentInput::new(format!("doc{i}.pdf"), vec![candidate])
        })
        .collect();
    let report = extractor.extract_batch(&inputs);

    let novel: usize = report
        .documents
        .iter()
        .filter_map(|d| d.metrics().and_then(|m| m.novel_patterns))
        .sum();
    assert_eq!(novel, 1);
    assert_eq!(memory.len(), 1);
    assert_eq!(extractor.stats().patterns_learned, 1);
}

#[test]
fn test_memory_persists_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let feed_path = dir.path().join("proposal.pdf.json");
    let memory_path = dir.path().join("patterns.json");
    std::fs::write(
        &feed_path,
        serde_json::to_string(&FeedFile::Document {
            candidates: make_report_document(),
        })
        .unwrap(),
    )
    .unwrap();

    let (report, extractor) =
        consolidate_feeds(&[&feed_path], ExtractionConfig::default(), None).unwrap();
    assert_eq!(report.documents[0].document, "proposal.pdf");
    assert_eq!(report.documents[0].metrics().unwrap().novel_patterns, Some(3));
    extractor.memory().unwrap().save(&memory_path).unwrap();

    let memory = PatternMemory::load(&memory_path).unwrap();
    assert_eq!(memory.len(), 3);
    let (report, _) =
        consolidate_feeds(&[&feed_path], ExtractionConfig::default(), Some(memory)).unwrap();
    assert_eq!(report.documents[0].metrics().unwrap().novel_patterns, Some(0));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_percent_threshold_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"confidence_threshold": 75, "parallel_agents": 2}"#).unwrap();

    let config = ExtractionConfig::from_file(&path).unwrap();
    assert!((config.confidence_threshold - 0.75).abs() < 1e-6);
    assert_eq!(config.parallel_agents, 2);

    let candidate = make_candidate("a", 1, &COST_HEADERS, cost_rows(1, 3), 0.80, vec![]);
    let result = ExtractionSession::new("doc.pdf", &config).run(&vec![candidate]);
    assert_eq!(result.tables().len(), 1);
}
