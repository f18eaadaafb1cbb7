use bytes::Bytes;

use crate::config::InjectionConfig;

/// Precomputed client bootstrap block inserted before the `</head>`
/// marker of the root document. Built once at startup, immutable
/// afterwards, shared by every exchange.
#[derive(Debug, Clone)]
pub struct InjectionSnippet {
    bytes: Bytes,
}

impl InjectionSnippet {
    pub fn build(config: &InjectionConfig) -> Self {
        let reconnect = if config.reconnect { "true" } else { "false" };
        let protocols = render_protocol_list(&config.disable_protocols);
        let analytics = config
            .ga_tracking_id
            .as_deref()
            .map(render_analytics)
            .unwrap_or_default();
        let prefix = &config.asset_prefix;

        let text = format!(
            "  <script src=\"{prefix}/sockjs.min.js\"></script>\n    \
             <script src=\"{prefix}/shiny-server-client.min.js\"></script>\n    \
             <script>preShinyInit({{reconnect:{reconnect},disableProtocols:[{protocols}]}});</script>\n    \
             <link rel=\"stylesheet\" type=\"text/css\" href=\"{prefix}/shiny-server.css\">{analytics}\n  "
        );

        Self {
            bytes: Bytes::from(text),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Quoted protocol names joined by commas, empty for an empty list
fn render_protocol_list(protocols: &[String]) -> String {
    protocols
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_analytics(tracking_id: &str) -> String {
    if tracking_id.starts_with("UA-") {
        // Deprecated Google Analytics with a Universal Analytics id
        format!(
            "\n<script type=\"text/javascript\">\n\n\
             var _gaq = _gaq || [];\n\
             _gaq.push(['_setAccount', '{tracking_id}']);\n\
             _gaq.push(['_trackPageview']);\n\n\
             (function() {{\n    \
             var ga = document.createElement('script'); ga.type = 'text/javascript'; ga.async = true;\n    \
             ga.src = ('https:' == document.location.protocol ? 'https://ssl' : 'http://www') + '.google-analytics.com/ga.js';\n    \
             var s = document.getElementsByTagName('script')[0]; s.parentNode.insertBefore(ga, s);\n\
             }})();\n\n\
             </script>\n"
        )
    } else {
        format!(
            "\n<!-- Google tag (gtag.js) -->\n\
             <script async src=\"https://www.googletagmanager.com/gtag/js?id={tracking_id}\"></script>\n\
             <script>\n\
             window.dataLayer = window.dataLayer || [];\n\
             function gtag(){{dataLayer.push(arguments);}}\n\
             gtag('js', new Date());\n\
             gtag('config', '{tracking_id}');\n\
             </script>\n"
        )
    }
}
