use criterion::{criterion_group, criterion_main, Criterion};
use sketch_collab::broadcast::{BroadcastGroup, Line};
use sketch_collab::coordinator::Coordinator;
use sketch_collab::protocol::{EditRequest, PeerInfo, ServerMessage};
use sketch_core::{Color, Point, Shape, ShapeId, Sketch};
use std::hint::black_box;

fn peer() -> PeerInfo {
    PeerInfo::new("127.0.0.1:9000".parse().unwrap())
}

fn bench_parse_create(c: &mut Criterion) {
    let line = "CREATE rectangle |10 10 50 50 -16777216|";

    c.bench_function("parse_create_rectangle", |b| {
        b.iter(|| {
            black_box(EditRequest::parse(black_box(line)).unwrap());
        })
    });
}

fn bench_parse_polyline_100(c: &mut Criterion) {
    let points: Vec<String> = (0..100).map(|i| format!("{i} {}", i * 2)).collect();
    let line = format!("ADD 7 polyline |{} -16777216|", points.join(" "));

    c.bench_function("parse_add_polyline_100_points", |b| {
        b.iter(|| {
            black_box(ServerMessage::parse(black_box(&line)).unwrap());
        })
    });
}

fn bench_format_add(c: &mut Criterion) {
    let message = ServerMessage::Add {
        id: ShapeId::new(42).unwrap(),
        shape: Shape::ellipse(Point::new(10, 10), Point::new(50, 50), Color::BLACK),
    };

    c.bench_function("format_add_ellipse", |b| {
        b.iter(|| {
            black_box(black_box(&message).to_string());
        })
    });
}

fn bench_topmost_1000_shapes(c: &mut Criterion) {
    let mut sketch = Sketch::new();
    for i in 0..1000 {
        let shape = Shape::rectangle(Point::new(i, i), Point::new(i + 20, i + 20), Color::BLACK);
        sketch.create_with_new_id(shape).unwrap();
    }

    c.bench_function("topmost_at_1000_shapes", |b| {
        b.iter(|| {
            black_box(sketch.topmost_at(black_box(-5), black_box(-5)));
        })
    });
}

fn bench_broadcast_100_peers(c: &mut Criterion) {
    c.bench_function("broadcast_100_peers", |b| {
        b.iter(|| {
            let mut group = BroadcastGroup::new(1024);

            // Add 100 peers
            let mut receivers = Vec::new();
            for _ in 0..100 {
                receivers.push(group.add_peer(peer()));
            }

            let count = group.broadcast(black_box(Line::from("MOVE 1 5 5")));
            black_box(count);
        })
    });
}

fn bench_broadcast_1000_messages(c: &mut Criterion) {
    c.bench_function("broadcast_1000_msgs_100_peers", |b| {
        b.iter(|| {
            let mut group = BroadcastGroup::new(2048);

            let mut receivers = Vec::new();
            for _ in 0..100 {
                receivers.push(group.add_peer(peer()));
            }

            for i in 0..1000u32 {
                group.broadcast(black_box(Line::from(format!("DELETE {}", i + 1))));
            }
        })
    });
}

fn bench_apply_edit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("coordinator_1000_creates_10_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let coordinator = Coordinator::new(2048);
                let mut registrations = Vec::new();
                for _ in 0..10 {
                    registrations.push(coordinator.register(peer()).await);
                }

                for i in 0..1000 {
                    let line = format!("CREATE segment |{i} 0 {i} 10 255|");
                    black_box(coordinator.apply_edit(&line).await.unwrap());
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_parse_create,
    bench_parse_polyline_100,
    bench_format_add,
    bench_topmost_1000_shapes,
    bench_broadcast_100_peers,
    bench_broadcast_1000_messages,
    bench_apply_edit,
);
criterion_main!(benches);
