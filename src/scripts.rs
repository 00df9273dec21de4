//! Page scripts evaluated during capture.
//!
//! Every script is a single expression (usually an IIFE) so its value comes
//! back through `Engine::evaluate_script_in_page`. Parameterized scripts are
//! built from templates by substituting `__NAME__` tokens, which keeps the
//! JavaScript braces readable.

use crate::geometry::RenderPlan;

/// First non-transparent computed background among body, html and the
/// first matching content container. Returns a CSS color string.
pub const BACKGROUND_PROBE: &str = r#"(function() {
    function opaque(bg) {
        return bg && bg !== 'rgba(0, 0, 0, 0)' && bg !== 'transparent';
    }
    var bodyBg = window.getComputedStyle(document.body).backgroundColor;
    if (opaque(bodyBg)) return bodyBg;

    var htmlBg = window.getComputedStyle(document.documentElement).backgroundColor;
    if (opaque(htmlBg)) return htmlBg;

    var containers = document.querySelectorAll('div, main, section, #banner, .frame');
    for (var i = 0; i < containers.length; i++) {
        var bg = window.getComputedStyle(containers[i]).backgroundColor;
        if (opaque(bg)) return bg;
    }
    return 'rgb(0, 0, 0)';
})()"#;

const PROPORTIONAL_SCALING_TEMPLATE: &str = r#"(function() {
    var targetW = __TARGET_W__, targetH = __TARGET_H__;
    var bg = '__BG__';

    [document.documentElement, document.body].forEach(function(el) {
        el.style.margin = '0';
        el.style.padding = '0';
        el.style.width = targetW + 'px';
        el.style.height = targetH + 'px';
        el.style.minHeight = targetH + 'px';
        el.style.maxHeight = targetH + 'px';
        el.style.overflow = 'hidden';
        el.style.background = bg;
    });
    document.body.style.position = 'relative';

    var wrapper = document.createElement('div');
    wrapper.id = '__content_wrapper__';
    wrapper.style.position = 'absolute';
    wrapper.style.left = '__PAD_X__px';
    wrapper.style.top = '__PAD_Y__px';
    wrapper.style.width = '__SOURCE_W__px';
    wrapper.style.height = '__SOURCE_H__px';
    wrapper.style.transform = 'scale(__SCALE__)';
    wrapper.style.transformOrigin = 'top left';

    while (document.body.firstChild) {
        wrapper.appendChild(document.body.firstChild);
    }
    document.body.appendChild(wrapper);

    // Grow canvas backing stores so scaled canvases stay sharp.
    var canvases = wrapper.getElementsByTagName('canvas');
    for (var i = 0; i < canvases.length; i++) {
        var canvas = canvases[i];
        var origW = canvas.width, origH = canvas.height;
        canvas.width = Math.floor(origW * __SCALE__);
        canvas.height = Math.floor(origH * __SCALE__);
        canvas.style.width = origW + 'px';
        canvas.style.height = origH + 'px';
        console.log('Scaled canvas buffer: ' + origW + 'x' + origH + ' -> ' + canvas.width + 'x' + canvas.height);
        if (window.render) window.render();
        if (canvas.render) canvas.render();
    }
    return canvases.length;
})()"#;

/// Scale the page content into the target frame and center it.
pub fn proportional_scaling(plan: &RenderPlan, bg_hex: &str) -> String {
    let target = plan.target();
    PROPORTIONAL_SCALING_TEMPLATE
        .replace("__TARGET_W__", &target.width.to_string())
        .replace("__TARGET_H__", &target.height.to_string())
        .replace("__BG__", &js_string_body(bg_hex))
        .replace("__PAD_X__", &plan.pad_x.to_string())
        .replace("__PAD_Y__", &plan.pad_y.to_string())
        .replace("__SOURCE_W__", &plan.source.width.to_string())
        .replace("__SOURCE_H__", &plan.source.height.to_string())
        .replace("__SCALE__", &plan.scale.to_string())
}

/// Strip default margins and scrollbars when rendering at the native size.
pub const STANDARD_RESET: &str = r#"(function() {
    [document.documentElement, document.body].forEach(function(el) {
        el.style.margin = '0';
        el.style.padding = '0';
        el.style.overflow = 'hidden';
    });
    return true;
})()"#;

/// Heuristics that coax common ad frameworks into starting their animations.
pub const ANIMATION_TRIGGER: &str = r#"(function() {
    var style = document.createElement('style');
    style.innerHTML = '* { animation-play-state: running !important; animation-delay: 0s !important; }';
    document.head.appendChild(style);

    var firstInteractive = document.querySelector('.button, .amount, [class*="hover"]');
    if (firstInteractive) {
        firstInteractive.classList.add('force-hover');
    }

    document.querySelectorAll('a, button, [class*="hover"], [class*="interactive"]').forEach(function(el) {
        el.dispatchEvent(new MouseEvent('mouseover', {bubbles: true, cancelable: true}));
        el.dispatchEvent(new MouseEvent('mouseenter', {bubbles: true, cancelable: true}));
    });

    document.body.click();
    document.body.dispatchEvent(new MouseEvent('mouseover', {bubbles: true}));

    ['startAnimation', 'start', 'init', 'play', 'animate'].forEach(function(name) {
        if (typeof window[name] === 'function') {
            try { window[name](); } catch (e) { console.warn(name + '() threw: ' + e); }
        }
    });

    if (typeof createjs !== 'undefined' && createjs.Ticker) {
        console.log('CreateJS detected, setting up ticker');
        window.__createJSActive = true;
        if (!createjs.Ticker.hasEventListener('tick')) {
            console.log('CreateJS ticker not started, starting now');
            createjs.Ticker.framerate = 30;
            createjs.Ticker.timingMode = createjs.Ticker.RAF;
        }
    }

    if (typeof gsap !== 'undefined') {
        console.log('GSAP detected');
        window.__gsapActive = true;
    }

    window.animationStartTime = Date.now();
    window.animationEnabled = true;

    var videos = document.getElementsByTagName('video');
    for (var i = 0; i < videos.length; i++) {
        try { videos[i].play(); } catch (e) {}
    }

    var canvases = document.getElementsByTagName('canvas');
    console.log('Found ' + canvases.length + ' canvas elements');
    for (var j = 0; j < canvases.length; j++) {
        console.log('Canvas ' + j + ': ' + canvases[j].width + 'x' + canvases[j].height);
    }
    return true;
})()"#;

/// Stylesheet count, `@keyframes` names and the number of animated elements.
pub const ANIMATION_INFO: &str = r#"(function() {
    var info = { stylesheets: document.styleSheets.length, animations: [], animated_elements: 0 };
    for (var i = 0; i < document.styleSheets.length; i++) {
        try {
            var rules = document.styleSheets[i].cssRules || document.styleSheets[i].rules;
            for (var j = 0; j < rules.length; j++) {
                if (rules[j].type === CSSRule.KEYFRAMES_RULE) info.animations.push(rules[j].name);
            }
        } catch (e) {}
    }
    var elements = document.querySelectorAll('*');
    for (var k = 0; k < elements.length; k++) {
        var name = window.getComputedStyle(elements[k]).animationName;
        if (name && name !== 'none') info.animated_elements++;
    }
    return info;
})()"#;

/// Pause every Web Animation and keep handles for seeking. Returns the count.
pub const PAUSE_ANIMATIONS: &str = r#"(function() {
    window.__animationElements = [];
    document.querySelectorAll('*').forEach(function(el) {
        el.getAnimations().forEach(function(anim) {
            anim.pause();
            window.__animationElements.push(anim);
        });
    });
    window.__animationStartTime = performance.now();
    console.log('Paused ' + window.__animationElements.length + ' animations');
    return window.__animationElements.length;
})()"#;

const SEEK_TEMPLATE: &str = r#"(function() {
    var elapsedMs = __ELAPSED_MS__;
    if (window.__animationElements) {
        window.__animationElements.forEach(function(anim) { anim.currentTime = elapsedMs; });
    }
    if (typeof createjs !== 'undefined' && createjs.Ticker) {
        createjs.Ticker._tick();
    }
    if (typeof gsap !== 'undefined' && gsap.globalTimeline) {
        gsap.ticker.tick();
    }
    return document.body.offsetHeight;
})()"#;

/// Move all paused animations to `elapsed_ms` and tick JS animation clocks.
pub fn seek(elapsed_ms: f64) -> String {
    SEEK_TEMPLATE.replace("__ELAPSED_MS__", &format!("{:.3}", elapsed_ms))
}

pub const VIEWPORT_SIZE: &str = "({ w: window.innerWidth, h: window.innerHeight })";

pub const BODY_SIZE: &str = "({ w: document.body.offsetWidth, h: document.body.offsetHeight })";

/// Escape a value for inclusion inside a single-quoted JS string.
fn js_string_body(value: &str) -> String {
    value
        .chars()
        .flat_map(|c| match c {
            '\\' => vec!['\\', '\\'],
            '\'' => vec!['\\', '\''],
            '\n' => vec!['\\', 'n'],
            '\r' => vec!['\\', 'r'],
            '<' => vec!['\\', 'x', '3', 'c'],
            c => vec![c],
        })
        .collect()
}
