// Embedded-workflow extraction from PNG files.
//
// ComfyUI saves the node graph as a "workflow" text chunk (tEXt, or iTXt for
// non-latin1 content). Anything that goes wrong here means "no workflow",
// never an error: galleries are built from whatever images carry usable
// metadata.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;

/// Keyword of the chunk holding the workflow JSON.
const WORKFLOW_KEY: &str = "workflow";

/// All decodable text chunks of a PNG, as (keyword, text) pairs.
pub fn read_text_chunks(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let decoder = png::Decoder::new(BufReader::new(file));
    let mut reader = decoder
        .read_info()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    // Pick up chunks stored after the image data too.
    let _ = reader.finish();

    let info = reader.info();
    let mut chunks = Vec::new();
    for text in &info.uncompressed_latin1_text {
        chunks.push((text.keyword.clone(), text.text.clone()));
    }
    for text in &info.utf8_text {
        if let Ok(decoded) = text.get_text() {
            chunks.push((text.keyword.clone(), decoded));
        }
    }
    Ok(chunks)
}

/// The workflow embedded in a PNG, when there is a parseable one.
/// Missing chunk, undecodable file, malformed JSON and a non-object root all
/// yield None.
pub fn workflow_from_image(path: &Path) -> Option<Value> {
    let chunks = match read_text_chunks(path) {
        Ok(chunks) => chunks,
        Err(e) => {
            debug!("{}: {:#}", path.display(), e);
            return None;
        }
    };
    let text = chunks
        .iter()
        .find(|(keyword, _)| keyword == WORKFLOW_KEY)
        .map(|(_, text)| text)?;
    let workflow: Value = serde_json::from_str(text).ok()?;
    workflow.is_object().then_some(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;

    fn write_png(path: &Path, chunks: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), 2, 2);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, text) in chunks {
            encoder
                .add_itxt_chunk(keyword.to_string(), text.to_string())
                .unwrap();
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0u8; 12]).unwrap();
    }

    #[test]
    fn test_workflow_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zi_test.png");
        write_png(&path, &[("workflow", r#"{"nodes": []}"#)]);
        let workflow = workflow_from_image(&path).unwrap();
        assert_eq!(workflow["nodes"], serde_json::json!([]));
    }

    #[test]
    fn test_absent_or_malformed_is_none() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("plain.png");
        write_png(&plain, &[]);
        assert!(workflow_from_image(&plain).is_none());

        let bad_json = dir.path().join("bad.png");
        write_png(&bad_json, &[("workflow", "not json")]);
        assert!(workflow_from_image(&bad_json).is_none());

        let non_object = dir.path().join("arr.png");
        write_png(&non_object, &[("workflow", "[1, 2]")]);
        assert!(workflow_from_image(&non_object).is_none());

        assert!(workflow_from_image(&dir.path().join("missing.png")).is_none());
    }
}
