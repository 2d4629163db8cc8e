/// Email archive source (mbox, maildir, eml, emlx)
///
/// Walks configured paths for email files and parses them with `mailparse`.
/// An mbox file becomes a single document holding all of its messages; the
/// first message supplies the title and header metadata.
use crate::config::expand_path;
use crate::error::{Error, Result};
use crate::sources::{content_hash, document_id, generate_preview, FileInfo, Source};
use crate::types::{Document, SourceKind};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mailparse::MailHeaderMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

const PREVIEW_MAX_LEN: usize = 500;
const BODY_LIMIT: usize = 1 << 20;

/// Indexes email archives from configured directories
pub struct EmailSource {
    paths: Vec<String>,
}

impl EmailSource {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }

    fn is_email_file(path: &Path) -> bool {
        match path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("mbox") | Some("eml") | Some("emlx") => return true,
            _ => {}
        }
        // Maildir messages usually have no extension; their parent is
        // cur/ or new/.
        matches!(
            path.parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .as_deref(),
            Some("cur") | Some("new")
        )
    }
}

#[async_trait]
impl Source for EmailSource {
    fn name(&self) -> SourceKind {
        SourceKind::Email
    }

    fn scan(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<FileInfo>, mpsc::Receiver<Error>) {
        let (file_tx, file_rx) = mpsc::channel(100);
        let (err_tx, err_rx) = mpsc::channel(10);
        let paths = self.paths.clone();

        tokio::task::spawn_blocking(move || {
            for base in &paths {
                if cancel.is_cancelled() {
                    return;
                }
                let path = expand_path(base);

                let metadata = match std::fs::metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            let _ = err_tx.blocking_send(e.into());
                        }
                        continue;
                    }
                };

                if metadata.is_file() {
                    if Self::is_email_file(&path) {
                        if let Some(info) = file_info(&path, &metadata) {
                            if file_tx.blocking_send(info).is_err() {
                                return;
                            }
                        }
                    }
                    continue;
                }

                for entry in WalkDir::new(&path) {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let Ok(entry) = entry else { continue };
                    if !entry.file_type().is_file() || !Self::is_email_file(entry.path()) {
                        continue;
                    }
                    let Ok(metadata) = entry.metadata() else {
                        continue;
                    };
                    if let Some(info) = file_info(entry.path(), &metadata) {
                        if file_tx.blocking_send(info).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        (file_rx, err_rx)
    }

    fn matches_path(&self, path: &str) -> bool {
        let candidate = normalize(path);
        if !Self::is_email_file(&candidate) {
            return false;
        }
        self.paths.iter().any(|base| {
            let base = normalize(&expand_path(base).to_string_lossy());
            !base.as_os_str().is_empty() && candidate.starts_with(&base)
        })
    }

    async fn parse(&self, file: &FileInfo) -> Result<Document> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| Error::parse(&file.path, e))?;

        let ext = Path::new(&file.path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let messages = match ext.as_str() {
            "mbox" => parse_mbox(&bytes),
            "emlx" => parse_emlx(&bytes)
                .map(|m| vec![m])
                .map_err(|e| Error::parse(&file.path, e))?,
            _ => vec![parse_message(&bytes).map_err(|e| Error::parse(&file.path, e))?],
        };

        Ok(build_email_document(file, messages))
    }
}

/// Parsed fields of one message
struct EmailMessage {
    subject: String,
    from: String,
    to: String,
    date: Option<chrono::DateTime<Utc>>,
    body: String,
}

/// Split an mbox file on `From ` separator lines and parse each message.
/// Messages that fail to parse are dropped.
fn parse_mbox(bytes: &[u8]) -> Vec<EmailMessage> {
    let text = String::from_utf8_lossy(bytes);
    let mut messages = Vec::new();
    let mut current = String::new();
    let mut in_message = false;

    for line in text.lines() {
        if line.starts_with("From ") && (current.is_empty() || in_message) {
            if in_message && !current.is_empty() {
                if let Ok(message) = parse_message(current.as_bytes()) {
                    messages.push(message);
                }
                current.clear();
            }
            in_message = true;
            continue;
        }
        if in_message {
            current.push_str(line);
            current.push('\n');
        }
    }

    if !current.is_empty() {
        if let Ok(message) = parse_message(current.as_bytes()) {
            messages.push(message);
        }
    }

    messages
}

/// Apple Mail `.emlx`: a byte count line, the RFC 2822 message, then a
/// trailing plist.
fn parse_emlx(bytes: &[u8]) -> std::result::Result<EmailMessage, mailparse::MailParseError> {
    let text = String::from_utf8_lossy(bytes);
    let mut content = text.as_ref();
    if let Some(idx) = content.find('\n') {
        content = &content[idx + 1..];
    }
    if let Some(idx) = content.find("<?xml") {
        content = &content[..idx];
    }
    parse_message(content.as_bytes())
}

fn parse_message(bytes: &[u8]) -> std::result::Result<EmailMessage, mailparse::MailParseError> {
    let parsed = mailparse::parse_mail(bytes)?;

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let from = parsed.headers.get_first_value("From").unwrap_or_default();
    let to = parsed.headers.get_first_value("To").unwrap_or_default();
    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    let body = extract_body(&parsed);

    Ok(EmailMessage {
        subject,
        from,
        to,
        date,
        body,
    })
}

/// Pull plain text out of a message, preferring text/plain parts of
/// multipart messages and stripping tags from HTML-only bodies.
fn extract_body(mail: &mailparse::ParsedMail<'_>) -> String {
    if mail.subparts.is_empty() {
        let body = mail.get_body().unwrap_or_default();
        let body = truncate_chars(&body, BODY_LIMIT);
        if mail.ctype.mimetype.starts_with("text/html") {
            return strip_html(&body);
        }
        return body;
    }

    let mut text_parts = Vec::new();
    collect_text_parts(mail, &mut text_parts);
    if !text_parts.is_empty() {
        return text_parts.join("\n\n");
    }

    String::new()
}

fn collect_text_parts(mail: &mailparse::ParsedMail<'_>, out: &mut Vec<String>) {
    for part in &mail.subparts {
        if part.ctype.mimetype.starts_with("text/plain") {
            if let Ok(body) = part.get_body() {
                out.push(truncate_chars(&body, BODY_LIMIT));
            }
        } else if !part.subparts.is_empty() {
            collect_text_parts(part, out);
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

/// Remove HTML tags, keeping text content.
fn strip_html(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }
    result.trim().to_string()
}

fn build_email_document(file: &FileInfo, messages: Vec<EmailMessage>) -> Document {
    let filename = Path::new(&file.path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.path.clone());

    let mut title = filename.clone();
    let mut metadata = HashMap::new();
    let mut content = String::new();

    for (i, message) in messages.iter().enumerate() {
        if i == 0 {
            if !message.subject.is_empty() {
                title = message.subject.clone();
            }
            if !message.from.is_empty() {
                metadata.insert("from".to_string(), message.from.clone());
            }
            if !message.to.is_empty() {
                metadata.insert("to".to_string(), message.to.clone());
            }
            if let Some(date) = message.date {
                metadata.insert("date".to_string(), date.to_rfc3339());
            }
        }

        if message.body.is_empty() {
            continue;
        }
        if !content.is_empty() {
            content.push_str("\n\n---\n\n");
        }
        if !message.subject.is_empty() {
            content.push_str("Subject: ");
            content.push_str(&message.subject);
            content.push_str("\n\n");
        }
        content.push_str(&message.body);
    }

    Document {
        id: document_id(&file.path),
        source: SourceKind::Email,
        path: file.path.clone(),
        title,
        preview: generate_preview(&content, PREVIEW_MAX_LEN),
        content_hash: content_hash(&content),
        content,
        metadata,
        indexed_at: Utc::now(),
        modified_at: Utc
            .timestamp_opt(file.modified_at, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }
}

fn file_info(path: &Path, metadata: &std::fs::Metadata) -> Option<FileInfo> {
    let modified_at = metadata
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Some(FileInfo {
        path: path.to_string_lossy().to_string(),
        modified_at,
        size: metadata.len(),
    })
}

fn normalize(path: &str) -> PathBuf {
    let path = Path::new(path);
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_EMAIL: &str = "From: alice@example.com\r\n\
        To: bob@example.com\r\n\
        Subject: Quarterly planning\r\n\
        Date: Mon, 2 Oct 2023 09:30:00 +0000\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        Let's meet on Tuesday to discuss the roadmap.\r\n";

    fn write_email(dir: &tempfile::TempDir, name: &str, content: &str) -> FileInfo {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        FileInfo {
            path: path.to_string_lossy().to_string(),
            modified_at: 1_700_000_000,
            size: content.len() as u64,
        }
    }

    fn source_for(dir: &tempfile::TempDir) -> EmailSource {
        EmailSource::new(vec![dir.path().to_string_lossy().to_string()])
    }

    #[test]
    fn test_is_email_file() {
        assert!(EmailSource::is_email_file(Path::new("/mail/archive.mbox")));
        assert!(EmailSource::is_email_file(Path::new("/mail/msg.eml")));
        assert!(EmailSource::is_email_file(Path::new("/mail/msg.emlx")));
        assert!(EmailSource::is_email_file(Path::new(
            "/Maildir/cur/1234567890.hostname"
        )));
        assert!(EmailSource::is_email_file(Path::new(
            "/Maildir/new/1234567890.hostname"
        )));
        assert!(!EmailSource::is_email_file(Path::new("/mail/notes.md")));
        assert!(!EmailSource::is_email_file(Path::new("/Maildir/tmp/msg")));
    }

    #[tokio::test]
    async fn test_parse_single_eml() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_email(&dir, "message.eml", SIMPLE_EMAIL);
        let source = source_for(&dir);

        let doc = source.parse(&file).await.unwrap();
        assert_eq!(doc.source, SourceKind::Email);
        assert_eq!(doc.title, "Quarterly planning");
        assert_eq!(doc.metadata.get("from").unwrap(), "alice@example.com");
        assert_eq!(doc.metadata.get("to").unwrap(), "bob@example.com");
        assert!(doc.content.contains("roadmap"));
        assert!(doc.metadata.contains_key("date"));
    }

    #[tokio::test]
    async fn test_parse_mbox_combines_messages() {
        let mbox = format!(
            "From alice@example.com Mon Oct  2 09:30:00 2023\n{}\nFrom carol@example.com Tue Oct  3 10:00:00 2023\nFrom: carol@example.com\nSubject: Second message\nContent-Type: text/plain\n\nAnother body here.\n",
            SIMPLE_EMAIL.replace("\r\n", "\n")
        );
        let dir = tempfile::tempdir().unwrap();
        let file = write_email(&dir, "archive.mbox", &mbox);
        let source = source_for(&dir);

        let doc = source.parse(&file).await.unwrap();
        // First message supplies the title, both bodies land in content.
        assert_eq!(doc.title, "Quarterly planning");
        assert!(doc.content.contains("roadmap"));
        assert!(doc.content.contains("Another body here."));
        assert!(doc.content.contains("---"));
    }

    #[tokio::test]
    async fn test_parse_multipart_prefers_plain_text() {
        let multipart = "From: a@example.com\r\n\
            Subject: Mixed\r\n\
            Content-Type: multipart/alternative; boundary=\"XYZ\"\r\n\
            \r\n\
            --XYZ\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            plain text body\r\n\
            --XYZ\r\n\
            Content-Type: text/html\r\n\
            \r\n\
            <p>html body</p>\r\n\
            --XYZ--\r\n";
        let dir = tempfile::tempdir().unwrap();
        let file = write_email(&dir, "mixed.eml", multipart);
        let source = source_for(&dir);

        let doc = source.parse(&file).await.unwrap();
        assert!(doc.content.contains("plain text body"));
        assert!(!doc.content.contains("<p>"));
    }

    #[tokio::test]
    async fn test_parse_emlx_strips_envelope() {
        let emlx = format!("123\n{}<?xml version=\"1.0\"?>\n<plist/>", SIMPLE_EMAIL);
        let dir = tempfile::tempdir().unwrap();
        let file = write_email(&dir, "message.emlx", &emlx);
        let source = source_for(&dir);

        let doc = source.parse(&file).await.unwrap();
        assert_eq!(doc.title, "Quarterly planning");
        assert!(!doc.content.contains("plist"));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>hello <b>world</b></p>"), "hello world");
        assert_eq!(strip_html("no tags"), "no tags");
    }

    #[tokio::test]
    async fn test_scan_finds_email_files() {
        let dir = tempfile::tempdir().unwrap();
        write_email(&dir, "a.eml", SIMPLE_EMAIL);
        write_email(&dir, "notes.md", "# not an email");
        std::fs::create_dir_all(dir.path().join("Maildir/cur")).unwrap();
        std::fs::write(
            dir.path().join("Maildir/cur/170000.host"),
            SIMPLE_EMAIL,
        )
        .unwrap();

        let source = source_for(&dir);
        let (mut files, _errs) = source.scan(CancellationToken::new());
        let mut found = Vec::new();
        while let Some(f) = files.recv().await {
            found.push(f.path);
        }
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_matches_path() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_for(&dir);

        let inside = dir.path().join("archive.mbox");
        std::fs::write(&inside, "x").unwrap();
        assert!(source.matches_path(&inside.to_string_lossy()));
        assert!(!source.matches_path("/elsewhere/archive.mbox"));
        assert!(!source.matches_path(&dir.path().join("notes.md").to_string_lossy()));
    }
}
