use serde::Serialize;
use serde_json::{Map, Value};

/// 消息段 (Segment)
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: Map<String, Value>,
}

impl Segment {
    pub fn new(type_: &str, data: Map<String, Value>) -> Self {
        Self {
            type_: type_.to_string(),
            data,
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// 消息链 (Message Chain)
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct Message(Vec<Segment>);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通用添加方法：手动构建 Segment
    pub fn add(mut self, type_: &str, data: Map<String, Value>) -> Self {
        self.0.push(Segment::new(type_, data));
        self
    }

    fn add_one(self, type_: &str, key: &str, value: String) -> Self {
        let mut data = Map::new();
        data.insert(key.into(), Value::from(value));
        self.add(type_, data)
    }

    /// 纯文本
    pub fn text(self, text: impl Into<String>) -> Self {
        self.add_one("text", "text", text.into())
    }

    /// 图片
    /// - `file`: URL、`base64://` 数据或本地文件路径
    pub fn image(self, file: impl Into<String>) -> Self {
        self.add_one("image", "file", file.into())
    }

    /// @某人
    pub fn at(self, user_id: impl ToString) -> Self {
        self.add_one("at", "qq", user_id.to_string())
    }

    /// 回复消息
    pub fn reply(self, message_id: impl ToString) -> Self {
        self.add_one("reply", "id", message_id.to_string())
    }

    /// 追加另一条消息的全部段
    pub fn extend(mut self, other: Message) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 拼接所有文本段
    pub fn plain_text(&self) -> String {
        self.0
            .iter()
            .filter(|s| s.type_ == "text")
            .filter_map(|s| s.str_field("text"))
            .collect()
    }

    /// 控制台等纯文本环境下的展示形式
    pub fn render(&self) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            match seg.type_.as_str() {
                "text" => out.push_str(seg.str_field("text").unwrap_or("")),
                "at" => {
                    out.push('@');
                    out.push_str(seg.str_field("qq").unwrap_or("?"));
                    out.push(' ');
                }
                "image" => {
                    let file = seg.str_field("file").unwrap_or("");
                    if file.starts_with("base64://") {
                        out.push_str(&format!("[图片: base64 {} 字节]", file.len() - 9));
                    } else {
                        out.push_str(&format!("[图片: {}]", file));
                    }
                }
                "reply" => {}
                other => out.push_str(&format!("[{}]", other)),
            }
        }
        out
    }
}

// 允许直接从字符串转换为纯文本消息
impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new().text(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::new().text(s)
    }
}
