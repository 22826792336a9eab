use criterion::{
    BenchmarkId, Criterion, black_box, criterion_group, criterion_main,
};
use femfield::{
    context::Context,
    mesh::grid::GridMesh,
    solver::{FindXiSettings, SearchScope},
};

/// Searches an `n × n` grid for a point in its last cell
///
/// Invalidation drops the memoized result but not the last successful
/// element, so this measures the hinted path through Newton iteration.
pub fn grid_scope_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_element_xi (grid scope)");
    for n in [4, 8, 16] {
        let mut mesh = GridMesh::new(&[n, n]).unwrap();
        let a = mesh.add_attribute_with("coordinates", 2, |p| {
            vec![p[0] + 0.1 * p[1], p[1] * (1.0 + 0.05 * p[0])]
        });
        let mut ctx = Context::new();
        let x = ctx.finite_element("coordinates", &mesh, a).unwrap();
        let e = mesh.element(&[n - 1, n - 1]).unwrap();
        let target = ctx
            .evaluate(
                &mesh,
                x,
                &femfield::eval::Location::element(e, &[0.3, 0.6]).unwrap(),
                false,
            )
            .unwrap()
            .values;
        let settings = FindXiSettings::default();

        group.bench_function(BenchmarkId::new("newton", n * n), |b| {
            b.iter(|| {
                // Clearing the field also drops the memoized search result
                ctx.invalidate(x).unwrap();
                black_box(
                    ctx.find_element_xi(
                        &mesh,
                        x,
                        &target,
                        &SearchScope::Mesh,
                        &settings,
                    )
                    .unwrap(),
                )
            })
        });
    }
}

pub fn texture_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_element_xi (texture)");
    for n in [4, 8, 16] {
        let mesh = GridMesh::new(&[n, n]).unwrap();
        let mut ctx = Context::new();
        let seed = mesh.element(&[0, 0]).unwrap();
        let t = ctx.texture_coordinates("texture", &mesh, seed).unwrap();
        let target = [n as f64 - 0.5, n as f64 - 0.5];
        let settings = FindXiSettings::default();

        group.bench_function(BenchmarkId::new("mapping", n * n), |b| {
            b.iter(|| {
                ctx.invalidate(t).unwrap();
                black_box(
                    ctx.find_element_xi(
                        &mesh,
                        t,
                        &target,
                        &SearchScope::Mesh,
                        &settings,
                    )
                    .unwrap(),
                )
            })
        });
    }
}

criterion_group!(benches, grid_scope_sweep, texture_lookup);
criterion_main!(benches);
