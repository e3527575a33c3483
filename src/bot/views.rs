//! Bot UI texts
//!
//! All user-visible strings live here. Texts that go through
//! `sendMessage`/`editMessageText` are HTML; callback answers are plain.

use crate::bot::transport::FileResolveError;
use crate::transmission::{TorrentId, TransmissionError};
use html_escape::encode_text;

// ─────────────────────────────────────────────────────────────────────────────
// Trait definition
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for download UI view rendering
pub trait DownloadView {
    /// Prompt sent together with the category buttons
    fn choose_category() -> &'static str;

    /// Callback answer for an unknown or used token
    fn token_expired() -> &'static str;

    /// Callback answer after a successful add
    fn added() -> &'static str;

    /// Text replacing the category prompt once a download is accepted
    fn accepted(category: &str) -> String;

    /// Callback answer when the engine refused the torrent
    fn engine_error(error: &TransmissionError) -> String;

    /// Callback answer when an uploaded file could not be fetched
    fn file_error(error: &FileResolveError) -> &'static str;

    /// Reply sent when a tracked download completes
    fn download_finished(id: TorrentId) -> String;

    /// Reply to `/start`
    fn help() -> &'static str;

    /// Reply to `/status`
    fn status(tracked: usize, pending: usize) -> String;

    /// Reply when a video fetch starts
    fn video_started() -> &'static str;

    /// Reply when a video fetch completes
    fn video_finished() -> &'static str;

    /// Reply when a video fetch fails
    fn video_failed(error: &str) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Default implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Default Russian-language implementation of `DownloadView`
pub struct DefaultDownloadView;

impl DownloadView for DefaultDownloadView {
    fn choose_category() -> &'static str {
        "Выберите категорию:"
    }

    fn token_expired() -> &'static str {
        "Срок действия кнопки истёк"
    }

    fn added() -> &'static str {
        "✅ Добавлено"
    }

    fn accepted(category: &str) -> String {
        format!(
            "📥 Загрузка в категорию <b>{}</b> принята.",
            encode_text(category)
        )
    }

    fn engine_error(error: &TransmissionError) -> String {
        format!("Transmission: {error}")
    }

    fn file_error(error: &FileResolveError) -> &'static str {
        match error {
            FileResolveError::Lookup(_) => "Не смог получить файл",
            FileResolveError::TooLarge { .. } => "Файл слишком большой",
            FileResolveError::Download(_) => "Ошибка загрузки файла",
            FileResolveError::Empty => "Ошибка чтения файла",
            FileResolveError::Timeout => "Истекло время загрузки файла",
            FileResolveError::Cancelled => "Бот останавливается",
        }
    }

    fn download_finished(id: TorrentId) -> String {
        format!("✅ Загрузка {id} завершена.")
    }

    fn help() -> &'static str {
        r"🧲 <b>Transmission bot</b>

Отправьте magnet-ссылку или .torrent файл, затем выберите категорию.
Когда загрузка завершится, я отвечу на сообщение.

/status — активные загрузки"
    }

    fn status(tracked: usize, pending: usize) -> String {
        format!("📊 Отслеживается загрузок: <b>{tracked}</b>\n🔘 Ожидают выбора категории: <b>{pending}</b>")
    }

    fn video_started() -> &'static str {
        "🎬 Скачиваю видео..."
    }

    fn video_finished() -> &'static str {
        "✅ Видео скачано."
    }

    fn video_failed(error: &str) -> String {
        format!("❌ Не удалось скачать видео: <code>{}</code>", encode_text(error))
    }
}
