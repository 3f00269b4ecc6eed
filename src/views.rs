//! html pages, rendered straight from format strings

/// escape html special characters to prevent xss
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// flash message category, mirrors the css class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flash {
    Success,
    Error,
}

fn layout(title: &str, logged_in: bool, body: &str) -> String {
    let nav = if logged_in {
        r#"<a href="/">Home</a> <a href="/logout">Logout</a>"#
    } else {
        r#"<a href="/landing">About</a> <a href="/login">Login</a>"#
    };
    format!(
        r#"<!doctype html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <style>
        body {{ font-family: system-ui; margin: 0; background: #f3f7f0; color: #1f2d1a; }}
        nav {{ background: #2f5d2a; padding: 0.8rem 1.5rem; }}
        nav a {{ color: #fff; margin-right: 1rem; text-decoration: none; }}
        main {{ max-width: 40rem; margin: 2rem auto; padding: 0 1rem; }}
        .card {{ background: #fff; border-radius: 8px; padding: 1rem 1.5rem; margin-bottom: 1rem; box-shadow: 0 1px 3px #0002; }}
        .flash-error {{ background: #fde2e1; color: #8a1f17; padding: 0.6rem 1rem; border-radius: 6px; }}
        .flash-success {{ background: #e0f4dc; color: #22561b; padding: 0.6rem 1rem; border-radius: 6px; }}
        label {{ display: block; margin-top: 0.8rem; }}
        input {{ width: 100%; padding: 0.4rem; }}
        button {{ margin-top: 1rem; padding: 0.5rem 1.2rem; }}
    </style>
</head>
<body>
<nav>{nav}</nav>
<main>
{body}
</main>
</body>
</html>"#,
        title = html_escape(title),
        nav = nav,
        body = body,
    )
}

pub fn landing() -> String {
    layout(
        "Plant Monitor",
        false,
        r#"<div class="card">
    <h1>Plant Monitor</h1>
    <p>Soil moisture and temperature for your plant, refreshed every few seconds.</p>
    <p><a href="/login">Log in</a> to see your dashboard.</p>
</div>"#,
    )
}

fn flash_html(flash: Option<(Flash, &str)>) -> String {
    match flash {
        Some((Flash::Error, msg)) => format!(r#"<p class="flash-error">{}</p>"#, html_escape(msg)),
        Some((Flash::Success, msg)) => {
            format!(r#"<p class="flash-success">{}</p>"#, html_escape(msg))
        }
        None => String::new(),
    }
}

pub fn login(flash: Option<(Flash, &str)>, email: &str) -> String {
    let body = format!(
        r#"{flash}
<div class="card">
    <h1>Login</h1>
    <form method="POST" action="/login">
        <label for="email">Email</label>
        <input type="email" id="email" name="email" value="{email}" required>
        <label for="password">Password</label>
        <input type="password" id="password" name="password" required>
        <button type="submit">Login</button>
    </form>
</div>"#,
        flash = flash_html(flash),
        email = html_escape(email),
    );
    layout("Login", false, &body)
}

/// dashboard; the browser refreshes the numbers from `/system`
pub fn home(flash: Option<(Flash, &str)>, first_name: &str, refresh_ms: u64) -> String {
    let body = format!(
        r#"{flash}
<h1>Hello, {name}</h1>
<div class="card">
    <p>System: <strong id="system_status">--</strong></p>
    <p>Plant: <strong id="plant_status">--</strong></p>
</div>
<div class="card">
    <p>Soil moisture: <strong id="soil_moisture">--</strong> %</p>
    <p>Temperature: <strong id="temperature">--</strong> &deg;C</p>
    <p>Last reading: <span id="last_watered">--</span></p>
</div>
<script>
async function refresh() {{
    try {{
        const res = await fetch('/system', {{ credentials: 'same-origin' }});
        if (!res.ok) return;
        const data = await res.json();
        for (const key of ['system_status', 'plant_status', 'soil_moisture', 'temperature', 'last_watered']) {{
            document.getElementById(key).textContent = data[key] ?? '--';
        }}
    }} catch (e) {{
        console.warn('status refresh failed', e);
    }}
}}
refresh();
setInterval(refresh, {refresh_ms});
</script>"#,
        flash = flash_html(flash),
        name = html_escape(first_name),
        refresh_ms = refresh_ms,
    );
    layout("Home", true, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_login_escapes_flash_and_email() {
        let page = login(Some((Flash::Error, "<bad>")), "a\"b@example.com");
        assert!(page.contains("&lt;bad&gt;"));
        assert!(page.contains("a&quot;b@example.com"));
        assert!(!page.contains("<bad>"));
    }

    #[test]
    fn test_home_polls_status_endpoint() {
        let page = home(None, "Fern", 5000);
        assert!(page.contains("Hello, Fern"));
        assert!(page.contains("fetch('/system'"));
        assert!(page.contains("setInterval(refresh, 5000)"));
        assert!(!page.contains("flash-success"));
    }

    #[test]
    fn test_home_shows_login_flash() {
        let page = home(Some((Flash::Success, "Logged in successfully!")), "Fern", 5000);
        assert!(page.contains(r#"<p class="flash-success">Logged in successfully!</p>"#));
    }
}
