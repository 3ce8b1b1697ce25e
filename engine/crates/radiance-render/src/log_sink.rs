use std::cell::RefCell;

use log::Level;

/// 组件输出诊断信息的接口，通过 [`crate::render_context::RenderContext`] 传递
pub trait LogSink {
    fn log(&self, level: Level, message: &str);

    #[inline]
    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    #[inline]
    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    #[inline]
    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

/// 转发到 `log` facade
pub struct LogFacadeSink {
    target: &'static str,
}

impl LogFacadeSink {
    pub const fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogFacadeSink {
    fn default() -> Self {
        Self::new("radiance")
    }
}

impl LogSink for LogFacadeSink {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: self.target, level, "{}", message);
    }
}

struct BufferedLog {
    text: String,
    /// 每一行在 `text` 中的起始位置
    line_offsets: Vec<usize>,
}

impl BufferedLog {
    fn new() -> Self {
        Self {
            text: String::new(),
            line_offsets: vec![0],
        }
    }

    fn append(&mut self, s: &str) {
        let old_size = self.text.len();
        self.text.push_str(s);
        self.line_offsets.extend(s.match_indices('\n').map(|(i, _)| old_size + i + 1));
    }
}

/// 追加式的文本缓冲，同时记录每一行的起始位置
///
/// 用作可滚动的调试控制台的数据源，测试中也用它来捕获输出
pub struct BufferedLogSink {
    inner: RefCell<BufferedLog>,
}

impl Default for BufferedLogSink {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl BufferedLogSink {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(BufferedLog::new()),
        }
    }
}

// getters
impl BufferedLogSink {
    pub fn text(&self) -> String {
        self.inner.borrow().text.clone()
    }

    /// 末尾换行之后的空行不计入
    pub fn line_count(&self) -> usize {
        let inner = self.inner.borrow();
        if inner.text.is_empty() {
            return 0;
        }
        if inner.text.ends_with('\n') { inner.line_offsets.len() - 1 } else { inner.line_offsets.len() }
    }

    pub fn line(&self, index: usize) -> Option<String> {
        if index >= self.line_count() {
            return None;
        }
        let inner = self.inner.borrow();
        let start = inner.line_offsets[index];
        let end = inner.line_offsets.get(index + 1).map(|next| next - 1).unwrap_or(inner.text.len());
        Some(inner.text[start..end].to_string())
    }

    pub fn lines(&self) -> Vec<String> {
        (0..self.line_count()).filter_map(|i| self.line(i)).collect()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.inner.borrow().text.contains(pattern)
    }
}

// tools
impl BufferedLogSink {
    pub fn clear(&self) {
        *self.inner.borrow_mut() = BufferedLog::new();
    }
}

impl LogSink for BufferedLogSink {
    fn log(&self, level: Level, message: &str) {
        self.inner.borrow_mut().append(&format!("[{level}] {message}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_sink_tracks_lines() {
        let sink = BufferedLogSink::new();
        assert_eq!(sink.line_count(), 0);

        sink.info("texture loaded");
        sink.error("decode failed\nsecond line");
        assert_eq!(sink.line_count(), 3);
        assert_eq!(sink.line(0).as_deref(), Some("[INFO] texture loaded"));
        assert_eq!(sink.line(1).as_deref(), Some("[ERROR] decode failed"));
        assert_eq!(sink.line(2).as_deref(), Some("second line"));
        assert_eq!(sink.line(3), None);
    }

    #[test]
    fn test_buffered_sink_clear() {
        let sink = BufferedLogSink::new();
        sink.warn("something");
        sink.clear();
        assert_eq!(sink.text(), "");
        assert!(sink.lines().is_empty());

        sink.info("again");
        assert_eq!(sink.lines(), vec!["[INFO] again".to_string()]);
    }
}
