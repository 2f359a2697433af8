use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor.extract_pages(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::extract_page_texts;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::Path;
    use tempfile::tempdir;

    /// Writes a PDF with one page per entry of `lines`, each drawn in Courier.
    pub(crate) fn write_text_pdf(
        path: &Path,
        lines: &[&str],
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for line in lines {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }

    #[test]
    fn extracts_text_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("two-pages.pdf");
        write_text_pdf(&path, &["Hydraulic pump manual", "Second page text"])?;

        let pages = extract_page_texts(&path)?;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert!(pages[0].text.contains("Hydraulic pump manual"));
        assert_eq!(pages[1].number, 2);
        assert!(pages[1].text.contains("Second page text"));
        Ok(())
    }

    #[test]
    fn broken_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = extract_page_texts(&path);
        assert!(matches!(result, Err(crate::IngestError::PdfParse(_))));
        Ok(())
    }
}
