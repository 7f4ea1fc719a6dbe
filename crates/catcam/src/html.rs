//! Embedded static HTML served by the stream server.
//!
//! Kept as `&'static str` so the page ships inside the binary without
//! filesystem lookups.

pub(crate) const INDEX_HTML: &str = r#"<!doctype html>
<html>

<head>
  <meta charset="UTF-8" />
  <title>Cat Detection Stream</title>
</head>

<body>
  <h1>Cat Detection Stream</h1>
  <img src="/stream" alt="live detection stream" />
</body>

</html>
"#;
