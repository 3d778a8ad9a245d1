use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;

use catlas_atlasgen::mesh::Mesh;
use catlas_atlasgen::structures::{StructureTable, StructureTree};

fn synthetic_color_table(rows: usize) -> String {
    let mut table = String::from("# color table\n# id acronym r g b alpha\n");
    for i in 0..rows {
        table.push_str(&format!("{} R{} {} {} {} 255\n", i + 1, i + 1, i % 256, (i * 7) % 256, (i * 13) % 256));
    }
    table
}

fn synthetic_names(rows: usize) -> String {
    let mut names = String::new();
    for i in 0..rows {
        names.push_str(&format!("R{},region number {}\n", i + 1, i + 1));
    }
    names
}

fn synthetic_obj(grid: usize) -> String {
    let mut obj = String::new();
    for x in 0..grid {
        for y in 0..grid {
            obj.push_str(&format!("v {} {} 0\n", x, y));
        }
    }
    for x in 0..grid - 1 {
        for y in 0..grid - 1 {
            let a = x * grid + y + 1;
            let b = a + 1;
            let c = a + grid;
            let d = c + 1;
            obj.push_str(&format!("f {} {} {}\n", a, b, c));
            obj.push_str(&format!("f {} {} {}\n", b, d, c));
        }
    }
    obj
}

fn bench_pipeline(c: &mut Criterion) {
    let colors = synthetic_color_table(300);
    let names = synthetic_names(300);
    c.bench_function("structure_table", |b| {
        b.iter(|| {
            StructureTable::from_readers(
                Cursor::new(black_box(&colors)),
                Cursor::new(black_box(&names)),
            )
            .unwrap()
        })
    });

    let table = StructureTable::from_readers(Cursor::new(&colors), Cursor::new(&names)).unwrap();
    c.bench_function("structure_tree", |b| {
        b.iter(|| StructureTree::from_table(black_box(&table)).unwrap())
    });

    let obj = synthetic_obj(64);
    c.bench_function("obj_mesh", |b| {
        b.iter(|| Mesh::obj_from_reader(Cursor::new(black_box(&obj))).unwrap())
    });
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
