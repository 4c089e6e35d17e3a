use anyhow::Result;
use chrono::{DateTime, Utc};
use printpdf::{
    BuiltinFont, Color, Greyscale, Line, LinePoint, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions,
    Point, Pt, Rgb, TextItem,
};
use rust_xlsxwriter::{Format, Workbook};

use crate::metrics::EXPORTS_GENERATED_TOTAL;
use crate::models::article::{Article, ArticleComparison};
use crate::models::progress::ProgressWithArticle;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const BODY_SIZE: f32 = 11.0;
const BODY_LINE_MM: f32 = 5.5;
/// Helvetica 11pt across the text block holds roughly this many characters
const WRAP_COLUMNS: usize = 92;

/// Greedy word wrap on character counts; words longer than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                lines.push(word.drain(..width).collect());
            }
            let word_len = word.len();
            if current_len > 0 && current_len + 1 + word_len > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(word);
            current_len += word_len;
        }
        lines.push(current);
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Single-column text report laid out top to bottom, paginating as needed
struct PdfReport {
    pages: Vec<Vec<Op>>,
    ops: Vec<Op>,
    cursor_mm: f32,
    accent: Color,
    text: Color,
    rule: Color,
}

impl PdfReport {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            ops: Vec::new(),
            cursor_mm: PAGE_HEIGHT_MM - MARGIN_MM,
            accent: Color::Rgb(Rgb {
                r: 0.16,
                g: 0.4,
                b: 0.69,
                icc_profile: None,
            }),
            text: Color::Greyscale(Greyscale::new(0.08, None)),
            rule: Color::Greyscale(Greyscale::new(0.65, None)),
        }
    }

    fn ensure_space(&mut self, needed_mm: f32) {
        if self.cursor_mm - needed_mm < MARGIN_MM {
            self.pages.push(std::mem::take(&mut self.ops));
            self.cursor_mm = PAGE_HEIGHT_MM - MARGIN_MM;
        }
    }

    fn title(&mut self, text: &str) {
        for line in wrap_text(text, 52) {
            self.ensure_space(9.0);
            let color = self.accent.clone();
            self.push_text(line, BuiltinFont::HelveticaBold, 18.0, &color);
            self.cursor_mm -= 9.0;
        }
        self.cursor_mm -= 2.0;
        self.rule_line();
    }

    fn heading(&mut self, text: &str) {
        self.ensure_space(14.0);
        self.cursor_mm -= 4.0;
        let color = self.accent.clone();
        self.push_text(text.to_string(), BuiltinFont::HelveticaBold, 12.5, &color);
        self.cursor_mm -= 7.0;
    }

    fn paragraph(&mut self, text: &str) {
        for line in wrap_text(text, WRAP_COLUMNS) {
            self.ensure_space(BODY_LINE_MM);
            let color = self.text.clone();
            self.push_text(line, BuiltinFont::Helvetica, BODY_SIZE, &color);
            self.cursor_mm -= BODY_LINE_MM;
        }
    }

    fn field(&mut self, label: &str, value: &str) {
        self.paragraph(&format!("{label}: {value}"));
    }

    fn bullets(&mut self, items: &[String], empty: &str) {
        if items.is_empty() {
            self.paragraph(empty);
            return;
        }
        for item in items {
            self.paragraph(&format!("- {item}"));
        }
    }

    fn rule_line(&mut self) {
        self.ops.push(Op::SetOutlineColor {
            col: self.rule.clone(),
        });
        self.ops.push(Op::SetOutlineThickness { pt: Pt(0.6) });
        self.ops.push(Op::DrawLine {
            line: Line {
                points: vec![
                    LinePoint {
                        p: Point::new(Mm(MARGIN_MM), Mm(self.cursor_mm)),
                        bezier: false,
                    },
                    LinePoint {
                        p: Point::new(Mm(PAGE_WIDTH_MM - MARGIN_MM), Mm(self.cursor_mm)),
                        bezier: false,
                    },
                ],
                is_closed: false,
            },
        });
        self.cursor_mm -= 6.0;
    }

    fn push_text(&mut self, text: String, font: BuiltinFont, size: f32, color: &Color) {
        self.ops.extend([
            Op::StartTextSection,
            Op::SetTextCursor {
                pos: Point::new(Mm(MARGIN_MM), Mm(self.cursor_mm)),
            },
            Op::SetFontSizeBuiltinFont {
                size: Pt(size),
                font,
            },
            Op::SetLineHeight { lh: Pt(size + 3.0) },
            Op::SetFillColor { col: color.clone() },
            Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(text)],
                font,
            },
            Op::EndTextSection,
        ]);
    }

    fn finish(mut self, document_title: &str) -> Vec<u8> {
        if !self.ops.is_empty() || self.pages.is_empty() {
            self.pages.push(std::mem::take(&mut self.ops));
        }
        let pages = self
            .pages
            .into_iter()
            .map(|ops| PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops))
            .collect();
        let mut warnings = Vec::new();
        PdfDocument::new(document_title)
            .with_pages(pages)
            .save(&PdfSaveOptions::default(), &mut warnings)
    }
}

/// Plain document with a title and paragraphs
pub fn render_text_pdf(title: &str, paragraphs: &[String]) -> Result<Vec<u8>> {
    let mut report = PdfReport::new();
    report.title(title);
    for paragraph in paragraphs {
        report.paragraph(paragraph);
    }
    Ok(report.finish(title))
}

/// Title, bibliographic details and abstract of an article
pub fn abstract_pdf(article: &Article) -> Result<Vec<u8>> {
    let mut report = PdfReport::new();
    report.title(&article.title);
    report.field("Authors", &article.authors_line());
    if let Some(year) = article.publication_year {
        report.field("Published", &year.to_string());
    }
    if !article.keywords.is_empty() {
        report.field("Keywords", &article.keywords.join(", "));
    }
    report.field("Topics", &article.topics_line());

    report.heading("Abstract");
    report.paragraph(article.abstract_or("No abstract available."));

    EXPORTS_GENERATED_TOTAL.with_label_values(&["pdf"]).inc();
    Ok(report.finish(&article.title))
}

pub fn comparison_pdf(first: &Article, second: &Article, comparison: &ArticleComparison) -> Result<Vec<u8>> {
    let mut report = PdfReport::new();
    report.title("Article Comparison");
    report.field("Article 1", &first.title);
    report.field("Article 2", &second.title);
    report.field(
        "Similarity",
        &format!("{}% ({})", comparison.similarity_score, comparison.similarity_label),
    );

    let none = "None";
    report.heading("Shared topics");
    report.bullets(&comparison.shared_topics, none);
    report.heading(&format!("Topics only in \"{}\"", first.title));
    report.bullets(&comparison.unique_topics1, none);
    report.heading(&format!("Topics only in \"{}\"", second.title));
    report.bullets(&comparison.unique_topics2, none);

    report.heading("Shared keywords");
    report.bullets(&comparison.shared_keywords, none);
    report.heading(&format!("Keywords only in \"{}\"", first.title));
    report.bullets(&comparison.unique_keywords1, none);
    report.heading(&format!("Keywords only in \"{}\"", second.title));
    report.bullets(&comparison.unique_keywords2, none);

    for (label, article) in [("Article 1", first), ("Article 2", second)] {
        report.heading(&format!("{label} abstract"));
        report.paragraph(article.abstract_or("No abstract available."));
    }

    EXPORTS_GENERATED_TOTAL.with_label_values(&["pdf"]).inc();
    Ok(report.finish("Article Comparison"))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// One row per completed Socratic session
pub fn progress_xlsx(student_name: &str, rows: &[ProgressWithArticle]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Progress")?;
    worksheet.set_column_width(0, 20.0)?;
    worksheet.set_column_width(1, 40.0)?;
    worksheet.set_column_width(7, 30.0)?;
    worksheet.set_column_width(8, 50.0)?;
    worksheet.set_column_width(9, 50.0)?;
    worksheet.set_column_width(10, 50.0)?;

    let header_format = Format::new().set_bold();

    worksheet.write_string_with_format(0, 0, "Student", &header_format)?;
    worksheet.write_string(0, 1, student_name)?;

    let headers = [
        "Completed",
        "Article",
        "Average score",
        "Comprehension",
        "Critical thinking",
        "Quality",
        "Question scores",
        "Difficulty path",
        "Strengths",
        "Weaknesses",
        "Recommendations",
    ];
    let header_row = 2;
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(header_row, col as u16, *header, &header_format)?;
    }

    let join_numbers = |values: &[f64]| {
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    for (i, row) in rows.iter().enumerate() {
        let r = header_row + 1 + i as u32;
        let progress = &row.progress;
        worksheet.write_string(r, 0, format_timestamp(&progress.created_at))?;
        worksheet.write_string(r, 1, row.article_title.as_deref().unwrap_or("Unknown article"))?;
        if let Some(avg) = progress.final_average_score {
            worksheet.write_number(r, 2, avg)?;
        }
        for (col, score) in [
            (3, progress.comprehension_score),
            (4, progress.critical_thinking_score),
            (5, progress.quality_score),
        ] {
            if let Some(score) = score {
                worksheet.write_number(r, col, score as f64)?;
            }
        }
        worksheet.write_string(r, 6, join_numbers(&progress.question_scores))?;
        let path: Vec<f64> = progress.difficulty_path.iter().map(|d| *d as f64).collect();
        worksheet.write_string(r, 7, join_numbers(&path))?;
        worksheet.write_string(r, 8, progress.strengths.join("; "))?;
        worksheet.write_string(r, 9, progress.weaknesses.join("; "))?;
        worksheet.write_string(r, 10, progress.recommendations.join("; "))?;
    }

    let bytes = workbook.save_to_buffer()?;
    EXPORTS_GENERATED_TOTAL.with_label_values(&["xlsx"]).inc();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::progress::StudentProgress;
    use mongodb::bson::oid::ObjectId;

    fn article(title: &str) -> Article {
        Article {
            id: Some(ObjectId::new()),
            user_id: ObjectId::new(),
            title: title.into(),
            authors: vec!["A. Author".into()],
            abstract_text: Some("word ".repeat(800)),
            full_text: None,
            keywords: vec!["transformers".into()],
            main_topics: vec!["nlp".into()],
            pages: 10,
            publication_year: Some(2017),
            analysis_completed: true,
            storage_path: None,
            created_at: Utc::now(),
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_text("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
    }

    #[test]
    fn splits_overlong_words_and_keeps_paragraphs() {
        let lines = wrap_text("abcdefghijkl\n\nnext", 5);
        assert_eq!(lines, vec!["abcde", "fghij", "kl", "", "next"]);
        assert!(wrap_text("", 10).is_empty());
    }

    #[test]
    fn abstract_pdf_is_a_pdf() {
        let bytes = abstract_pdf(&article("Attention Is All You Need")).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn comparison_pdf_renders() {
        let comparison = ArticleComparison {
            similarity_score: 50,
            similarity_label: "Moderate Similarity",
            shared_topics: vec!["nlp".into()],
            unique_topics1: vec![],
            unique_topics2: vec!["vision".into()],
            shared_keywords: vec![],
            unique_keywords1: vec!["transformers".into()],
            unique_keywords2: vec![],
        };
        let bytes = comparison_pdf(&article("One"), &article("Two"), &comparison).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn progress_workbook_is_a_zip() {
        let row = ProgressWithArticle {
            progress: StudentProgress {
                id: ObjectId::new().to_hex(),
                user_id: ObjectId::new().to_hex(),
                article_id: ObjectId::new().to_hex(),
                session_id: ObjectId::new().to_hex(),
                final_average_score: Some(72.5),
                question_scores: vec![80.0, 65.0, 0.0, 90.0, 100.0],
                difficulty_path: vec![3, 4, 5, 4, 5],
                comprehension_score: Some(70),
                critical_thinking_score: None,
                quality_score: Some(72),
                strengths: vec!["Clear".into()],
                weaknesses: vec![],
                recommendations: vec!["Cite sections".into()],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            article_title: Some("Attention".into()),
            article_authors: vec![],
        };
        let bytes = progress_xlsx("Ada Lovelace", &[row]).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }
}
