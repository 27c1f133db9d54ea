use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use seo_image_converter::config::{ImageConfig, OutputFormat};
use seo_image_converter::naming::NameResolver;
use seo_image_converter::{ImageOptimizer, OptimizeOptions};
use std::io::Cursor;

fn photo_like_jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x ^ y) % 256) as u8])
    });
    let mut data = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut data), ImageFormat::Jpeg)
        .expect("encode fixture");
    data
}

fn benchmark_encode(c: &mut Criterion) {
    let optimizer = ImageOptimizer::new(u64::MAX);
    let source = photo_like_jpeg(640, 480);
    let mut group = c.benchmark_group("encode_640x480");
    group.sample_size(10);

    for format in [OutputFormat::WebP, OutputFormat::Png, OutputFormat::Jpeg] {
        let mut config = ImageConfig::default();
        config.format = format;
        let options = OptimizeOptions::from_config(&config);

        group.bench_with_input(BenchmarkId::from_parameter(format), &options, |b, options| {
            b.iter(|| optimizer.optimize_bytes(black_box(&source), options).expect("optimize"))
        });
    }
    group.finish();
}

fn benchmark_downscale(c: &mut Criterion) {
    let optimizer = ImageOptimizer::new(u64::MAX);
    let source = photo_like_jpeg(2400, 1600);
    let mut config = ImageConfig::default();
    config.format = OutputFormat::Jpeg;
    config.resize_large = true;
    let options = OptimizeOptions::from_config(&config);

    c.bench_function("downscale_2400x1600_jpeg", |b| {
        b.iter(|| optimizer.optimize_bytes(black_box(&source), &options).expect("optimize"))
    });
}

fn benchmark_naming(c: &mut Criterion) {
    let resolver = NameResolver::new(&Default::default());
    let keywords: Vec<String> = ["golden", "retriever", "playing", "fetch", "sunny", "park", "green", "grass"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    c.bench_function("base_name", |b| b.iter(|| resolver.base_name(black_box(&keywords), "webp")));
}

criterion_group!(benches, benchmark_encode, benchmark_downscale, benchmark_naming);
criterion_main!(benches);
