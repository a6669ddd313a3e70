//! HTML pages for the browser side of the OAuth flow.
//!
//! Interpolated values are escaped; the license key embedded in the polling
//! script is emitted as a JSON string literal.

/// Delay between browser polls of `/check-database`.
pub const POLL_INTERVAL_MS: u64 = 3000;
/// The browser gives up after this many polls.
pub const MAX_POLLS: u32 = 30;

const STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: 'Inter', -apple-system, sans-serif; background: #f8fafc; display: flex; align-items: center; justify-content: center; min-height: 100vh; padding: 20px; }
.card { background: white; border-radius: 24px; padding: 48px 32px; max-width: 420px; width: 100%; text-align: center; box-shadow: 0 4px 24px rgba(0,0,0,0.06); }
.icon { font-size: 56px; margin-bottom: 16px; }
h2 { color: #111; font-size: 22px; margin-bottom: 8px; }
.subtitle { color: #6b7280; font-size: 14px; margin-bottom: 24px; }
.db-info { background: #f0fdf4; border: 1px solid #bbf7d0; border-radius: 12px; padding: 16px; margin-bottom: 24px; }
.db-info .label { color: #6b7280; font-size: 12px; margin-bottom: 4px; }
.db-info .value { color: #059669; font-size: 15px; font-weight: 600; }
.key-badge { display: inline-block; background: #f1f5f9; color: #475569; padding: 6px 14px; border-radius: 8px; font-size: 13px; font-family: monospace; margin-bottom: 24px; }
.hint { color: #9ca3af; font-size: 13px; line-height: 1.6; }
.error { color: #dc2626; }
.spinner { width: 48px; height: 48px; border: 4px solid #e5e7eb; border-top-color: #3b82f6; border-radius: 50%; animation: spin 0.8s linear infinite; margin: 0 auto 20px; }
@keyframes spin { to { transform: rotate(360deg); } }
#status { color: #9ca3af; font-size: 13px; margin-top: 16px; }
"#;

const HINT: &str = "现在可以在快捷指令中使用此 Key<br>所有内容将自动保存到上方数据库";

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title} | Capture OS</title>
<style>{STYLE}</style>
</head>
<body>
<div class="card">
{body}
</div>
</body>
</html>
"#
    )
}

/// Shown when the callback bound a database during its retry phase.
pub fn success_page(license_key: &str, database_title: &str) -> String {
    let body = format!(
        r#"<div class="icon">🎉</div>
<h2>配置成功！</h2>
<p class="subtitle">Notion 授权已完成，数据库已自动绑定</p>
<div class="db-info"><div class="label">已绑定数据库</div><div class="value">📗 {title}</div></div>
<div class="key-badge">{key}</div>
<p class="hint">{HINT}</p>"#,
        title = escape_html(database_title),
        key = escape_html(license_key),
    );
    layout("配置成功", &body)
}

/// Shown when the retry phase ended without a database. The script keeps
/// polling `/check-database` and switches to the success state on a hit.
pub fn polling_page(license_key: &str) -> String {
    // A JSON string is a valid JS string literal; `</` must not close the script.
    let key_literal = serde_json::to_string(license_key)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/");
    let body = format!(
        r#"<div class="spinner" id="spinner"></div>
<div class="icon" id="successIcon" style="display:none">🎉</div>
<h2 id="title">正在绑定数据库...</h2>
<p class="subtitle" id="subtitle">Notion 授权成功，正在检测您选择的数据库</p>
<div class="key-badge">{key}</div>
<div class="db-info" id="dbInfo" style="display:none"><div class="label">已绑定数据库</div><div class="value" id="dbName"></div></div>
<p class="hint" id="hint" style="display:none">{HINT}</p>
<div id="status">第 1 次检测中...</div>
<script>
const key = {key_literal};
const maxAttempts = {MAX_POLLS};
let attempt = 0;
const show = (id, on) => {{ document.getElementById(id).style.display = on ? 'block' : 'none'; }};
async function checkDatabase() {{
  attempt++;
  document.getElementById('status').textContent = '第 ' + attempt + ' 次检测中...';
  try {{
    const res = await fetch('/check-database?key=' + encodeURIComponent(key));
    const data = await res.json();
    if (data.found) {{
      show('spinner', false);
      show('successIcon', true);
      document.getElementById('title').textContent = '配置成功！';
      document.getElementById('subtitle').textContent = 'Notion 授权已完成，数据库已自动绑定';
      document.getElementById('dbName').textContent = '📗 ' + data.title;
      show('dbInfo', true);
      show('hint', true);
      show('status', false);
      return;
    }}
  }} catch (e) {{
    console.error(e);
  }}
  if (attempt < maxAttempts) {{
    setTimeout(checkDatabase, {POLL_INTERVAL_MS});
  }} else {{
    document.getElementById('status').textContent = '检测超时，请关闭页面后重新访问 /setup 进行授权';
    show('spinner', false);
  }}
}}
setTimeout(checkDatabase, {POLL_INTERVAL_MS});
</script>"#,
        key = escape_html(license_key),
    );
    layout("正在绑定数据库...", &body)
}

pub fn error_page(message: &str) -> String {
    let body = format!(
        r#"<div class="icon">⚠️</div>
<h2 class="error">出错了</h2>
<p class="subtitle">{}</p>"#,
        escape_html(message)
    );
    layout("错误", &body)
}
