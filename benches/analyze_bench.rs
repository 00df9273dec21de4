use criterion::{black_box, criterion_group, criterion_main, Criterion};
use html5video::geometry::{fit_dimensions, PaddingInfo, RenderPlan};
use html5video::{analyze_source, VideoConfig, Viewport};

const BANNER: &str = r#"<!doctype html>
<html><head><meta name="ad.size" content="width=300,height=250">
<style>#stage { width: 300px; height: 250px; } @keyframes fade { from { opacity: 0 } to { opacity: 1 } }</style>
</head><body><canvas id="canvas" width="300" height="250"></canvas>
<script>
var tl = gsap.timeline({ duration: 7.5 });
createjs.Ticker.framerate = 30;
function tick() { requestAnimationFrame(tick); }
tick();
</script></body></html>"#;

fn analyze_benchmark(c: &mut Criterion) {
    c.bench_function("analyze_source_banner", |b| {
        b.iter(|| black_box(analyze_source(black_box(BANNER))));
    });

    let large = BANNER.repeat(200);
    c.bench_function("analyze_source_large", |b| {
        b.iter(|| black_box(analyze_source(black_box(&large))));
    });
}

fn geometry_benchmark(c: &mut Criterion) {
    let config = VideoConfig {
        width: 320,
        height: 480,
        ..Default::default()
    };
    c.bench_function("render_plan", |b| {
        b.iter(|| black_box(RenderPlan::new(black_box(&config))));
    });

    c.bench_function("fit_dimensions", |b| {
        b.iter(|| black_box(fit_dimensions(black_box(Viewport::new(728, 90)), Viewport::new(1080, 1080))));
    });

    let padding = PaddingInfo {
        bg_color: "#ffffff".to_string(),
        source: Viewport::new(300, 250),
        target: Viewport::new(1080, 1920),
    };
    c.bench_function("padding_filter", |b| {
        b.iter(|| black_box(padding.filter()));
    });
}

criterion_group!(benches, analyze_benchmark, geometry_benchmark);
criterion_main!(benches);
