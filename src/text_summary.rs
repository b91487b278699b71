//! Text summary builder for CLI output.
//!
//! Formats the documents of a completed job. Fetching them is left to the
//! document service; only their locations are printed.

use crate::model::{DocumentKind, ResultBundle};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(bundle: &ResultBundle, base_url: &str) -> TextSummary {
    let mut lines = Vec::new();

    let title = if bundle.title.trim().is_empty() {
        "(untitled)"
    } else {
        bundle.title.as_str()
    };
    lines.push(format!("Title: {title}"));

    for (label, kind, name, path) in [
        ("PDF", DocumentKind::Pdf, &bundle.pdf_name, &bundle.pdf_path),
        ("Word", DocumentKind::Word, &bundle.word_name, &bundle.word_path),
    ] {
        if name.is_empty() && path.is_empty() {
            continue;
        }
        lines.push(format!("{label:<5} {name} ({path})"));
        match bundle.download_url(base_url, kind) {
            Some(url) => lines.push(format!("      {url}")),
            None => lines.push(format!("      unrecognized document path: {path}")),
        }
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_both_documents_with_urls() {
        let bundle = ResultBundle {
            title: "Clinic Booking".into(),
            pdf_name: "Clinic_Booking.pdf".into(),
            word_name: "Clinic_Booking.docx".into(),
            pdf_path: "amy/pdfs/Clinic_Booking.pdf".into(),
            word_path: "amy/words/Clinic_Booking.docx".into(),
            text: None,
        };
        let summary = build_text_summary(&bundle, "http://localhost:8000");
        assert_eq!(
            summary.lines,
            [
                "Title: Clinic Booking",
                "PDF   Clinic_Booking.pdf (amy/pdfs/Clinic_Booking.pdf)",
                "      http://localhost:8000/download-pdf/amy/Clinic_Booking.pdf",
                "Word  Clinic_Booking.docx (amy/words/Clinic_Booking.docx)",
                "      http://localhost:8000/download-word/amy/Clinic_Booking.docx",
            ]
        );
    }

    #[test]
    fn missing_documents_are_skipped() {
        let summary = build_text_summary(&ResultBundle::default(), "http://x");
        assert_eq!(summary.lines, ["Title: (untitled)"]);
    }
}
