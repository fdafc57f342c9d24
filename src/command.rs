use crate::event::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatch {
    /// 命中的前缀
    pub prefix: String,
    /// 指令后的原始文本（已去除首部空白）
    pub rest: String,
    /// 按空白切分后的参数
    pub args: Vec<String>,
}

pub fn get_prefixes(ctx: &Context) -> &[String] {
    &ctx.config.command_prefix
}

/// 解析指令：匹配 [Prefix][Command]，指令名之后必须是结尾或空白
pub fn match_command(ctx: &Context, command_name: &str) -> Option<CommandMatch> {
    match_text(&ctx.event.text, get_prefixes(ctx), command_name)
}

/// 依次尝试多个别名
pub fn match_any(ctx: &Context, names: &[String]) -> Option<CommandMatch> {
    names.iter().find_map(|n| match_command(ctx, n))
}

pub fn match_text(text: &str, prefixes: &[String], command_name: &str) -> Option<CommandMatch> {
    let trimmed = text.trim_start();
    if command_name.is_empty() {
        return None;
    }

    for prefix in prefixes {
        let Some(after_prefix) = trimmed.strip_prefix(prefix.as_str()) else {
            continue;
        };
        let Some(rest) = after_prefix.strip_prefix(command_name) else {
            continue;
        };
        // "bind" 不应命中 "bindlist"
        if let Some(c) = rest.chars().next()
            && !c.is_whitespace()
        {
            continue;
        }

        let rest = rest.trim().to_string();
        let args = rest.split_whitespace().map(String::from).collect();
        return Some(CommandMatch {
            prefix: prefix.clone(),
            rest,
            args,
        });
    }
    None
}
