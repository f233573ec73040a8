use rand::{thread_rng, Rng};

use crate::stealth::fingerprint::Fingerprint;

/// Build the Lua program the render backend executes for a stealth
/// fetch: pin the session identity, mask automation markers, then
/// scroll around like a person before returning the page.
///
/// Randomized scroll distances and click coordinates are baked in at
/// build time so every request ships a slightly different script.
pub fn stealth_page_script(fingerprint: &Fingerprint) -> String {
    let mut rng = thread_rng();

    let click_x: u32 = rng.gen_range(100..500);
    let click_y: u32 = rng.gen_range(100..500);
    let click_pause: f64 = rng.gen_range(0.1..0.5);
    let scroll_px: u32 = rng.gen_range(200..800);
    let scroll_pause: f64 = rng.gen_range(0.3..1.0);

    format!(
        r#"function main(splash, args)
    splash:set_user_agent(args.user_agent)
    splash:set_viewport_size(args.screen_width, args.screen_height)

    splash:autoload([[
        Object.defineProperty(navigator, 'webdriver', {{
            get: () => false
        }});

        Object.defineProperty(navigator, 'platform', {{
            get: () => '{platform}'
        }});

        Object.defineProperty(navigator, 'hardwareConcurrency', {{
            get: () => {hardware_concurrency}
        }});

        Object.defineProperty(navigator, 'deviceMemory', {{
            get: () => {device_memory}
        }});

        Object.defineProperty(navigator, 'languages', {{
            get: () => ['{locale}', 'en']
        }});

        const originalQuery = window.navigator.permissions.query;
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications' ?
                Promise.resolve({{ state: Notification.permission }}) :
                originalQuery(parameters)
        );

        window.chrome = {{
            runtime: {{}}
        }};
    ]])

    splash:set_custom_headers(args.headers)

    assert(splash:go(args.url))

    splash:wait(args.wait)

    splash:mouse_click({click_x}, {click_y})
    splash:wait({click_pause:.2})

    for i = 1, 3 do
        splash:runjs("window.scrollBy(0, {scroll_px})")
        splash:wait({scroll_pause:.2})
    end

    return {{
        html = splash:html(),
        url = splash:url(),
        cookies = splash:get_cookies()
    }}
end
"#,
        platform = fingerprint.platform,
        hardware_concurrency = fingerprint.hardware_concurrency,
        device_memory = fingerprint.device_memory,
        locale = fingerprint.locale.replace('_', "-"),
        click_x = click_x,
        click_y = click_y,
        click_pause = click_pause,
        scroll_px = scroll_px,
        scroll_pause = scroll_pause,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::fingerprint::FingerprintProvider;

    #[test]
    fn script_pins_fingerprint_attributes() {
        let fp = FingerprintProvider::sample();
        let script = stealth_page_script(&fp);

        assert!(script.contains(&format!("'{}'", fp.platform)));
        assert!(script.contains(&format!("() => {}", fp.hardware_concurrency)));
        assert!(script.contains("navigator, 'webdriver'"));
        assert!(script.contains("splash:get_cookies()"));
    }

    #[test]
    fn scripts_vary_between_builds() {
        let fp = FingerprintProvider::sample();
        let a: Vec<String> = (0..10).map(|_| stealth_page_script(&fp)).collect();
        assert!(a.iter().any(|s| *s != a[0]), "randomization is inert");
    }
}
