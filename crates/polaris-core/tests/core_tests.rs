use std::fs;
use std::io::Write;
use tempfile::TempDir;

use polaris_core::data_processor::DataProcessor;
use polaris_core::Error;

#[test]
fn process_directory_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let file_path = dir.join("a.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    writeln!(f, "Short text").unwrap();

    let processor = DataProcessor::new();
    let docs = processor.process_directory(dir, None).expect("process");

    assert_eq!(docs.len(), 1, "one file becomes one document");
    assert_eq!(docs[0].id, "a");
    assert_eq!(docs[0].raw_text.trim(), "Short text");
    assert_eq!(docs[0].category, "general");
    assert_eq!(docs[0].source, "file");
    assert_eq!(docs[0].metadata.get("word_count").map(String::as_str), Some("2"));
}

#[test]
fn process_directory_limited_two_files_limit_one() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("a.txt"), "alpha bravo").unwrap();
    fs::write(dir.join("b.txt"), "charlie delta").unwrap();

    let processor = DataProcessor::new();
    let docs = processor.process_directory(dir, Some(1)).expect("process limited");

    assert_eq!(docs.len(), 1, "limited to one source document");
}

#[test]
fn category_comes_from_parent_directory() {
    let tmp = TempDir::new().unwrap();
    let sub = tmp.path().join("leis");
    fs::create_dir_all(&sub).unwrap();
    fs::write(sub.join("cf88.md"), "Art. 5º Todos são iguais perante a lei.").unwrap();
    fs::write(sub.join("notes.pdf"), "binary").unwrap();

    let docs = DataProcessor::new().process_directory(tmp.path(), None).expect("process");
    assert_eq!(docs.len(), 1, "pdf has no registered extractor");
    assert_eq!(docs[0].id, "leis/cf88");
    assert_eq!(docs[0].category, "leis");
}

#[test]
fn unsupported_and_empty_files_are_validation_errors() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("x.pdf");
    let blank = tmp.path().join("blank.txt");
    fs::write(&pdf, "%PDF").unwrap();
    fs::write(&blank, "   \n\n  ").unwrap();

    let processor = DataProcessor::new();
    assert!(matches!(processor.process_document(&pdf), Err(Error::Validation(_))));
    assert!(matches!(processor.process_document(&blank), Err(Error::Validation(_))));
}

#[test]
fn registered_extractor_is_used() {
    fn shout(path: &std::path::Path) -> polaris_core::Result<String> {
        Ok(fs::read_to_string(path)?.to_uppercase())
    }
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("memo.law");
    fs::write(&file, "lei nova").unwrap();

    let mut processor = DataProcessor::new();
    processor.register("LAW", shout);
    assert!(processor.supported_extensions().contains(&"law"));
    assert_eq!(processor.process_document(&file).unwrap().text, "LEI NOVA");
}

#[test]
fn missing_directory_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = DataProcessor::new().process_directory(&tmp.path().join("nope"), None);
    assert!(matches!(err, Err(Error::NotFound(_))));
}
