use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;

use femfield::{
    context::{
        ColorConversion, Context, CoordinateSystem, CoordinateSystemType,
        FieldId,
    },
    eval::Location,
    mesh::{ElementId, Mesh, grid::GridMesh},
    solver::{FindXiSettings, SearchScope},
};

/// Evaluate and invert fields on a structured demo mesh
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,

    #[clap(flatten)]
    mesh: MeshSettings,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluates a field at a node or element location
    Eval {
        /// Field to evaluate
        #[clap(short, long, value_enum, default_value_t = FieldChoice::Coordinates)]
        field: FieldChoice,

        /// Lattice index of a node (e.g. `1,2`)
        #[clap(long, value_delimiter = ',', conflicts_with_all = ["element", "xi"])]
        node: Option<Vec<usize>>,

        /// Lattice index of an element (e.g. `0,1`)
        #[clap(long, value_delimiter = ',', requires = "xi")]
        element: Option<Vec<usize>>,

        /// Local coordinate within the element
        #[clap(long, value_delimiter = ',', allow_negative_numbers = true)]
        xi: Option<Vec<f64>>,

        /// Also compute derivatives with respect to xi
        #[clap(short, long)]
        derivatives: bool,

        /// Number of times to evaluate (for benchmarking)
        #[clap(short = 'N', default_value_t = 1)]
        n: usize,
    },

    /// Finds the element and xi at which a field takes the given values
    FindXi {
        /// Field to invert
        #[clap(short, long, value_enum, default_value_t = FieldChoice::Coordinates)]
        field: FieldChoice,

        /// Target values, one per field component
        #[clap(short, long, value_delimiter = ',', allow_negative_numbers = true)]
        target: Vec<f64>,

        /// Restrict the search to one element, by lattice index
        #[clap(long, value_delimiter = ',')]
        element: Option<Vec<usize>>,

        /// Convergence tolerance on xi
        #[clap(long, default_value_t = 1e-6)]
        tolerance: f64,

        /// Return the nearest element if there is no exact match
        #[clap(long)]
        nearest: bool,
    },

    /// Prints the texture offset of every element
    Texture {
        /// Lattice index of the seed element (defaults to the first cell)
        #[clap(long, value_delimiter = ',')]
        seed: Option<Vec<usize>>,
    },
}

#[derive(Parser)]
struct MeshSettings {
    /// Number of cells along each axis (e.g. `4,3`)
    #[clap(short, long, value_delimiter = ',', default_value = "4,4", global = true)]
    size: Vec<usize>,

    /// Shear applied to the coordinate attribute, to make it non-affine
    #[clap(short, long, default_value_t = 0.0, global = true)]
    warp: f64,

    /// Make an axis periodic
    #[clap(short, long, global = true)]
    periodic: Option<usize>,
}

#[derive(ValueEnum, Copy, Clone, Debug)]
enum FieldChoice {
    /// Interpolated nodal coordinates
    Coordinates,
    /// The local coordinate itself
    Xi,
    /// Coordinates treated as cylindrical polar, converted to Cartesian
    Polar,
    /// An RGB gradient across the mesh, converted to HSL (as L, S, H)
    Hsl,
    /// The same gradient, converted to grayscale
    Gray,
    /// Element or node identifier
    Cmiss,
    /// Number of mesh references to the element or node
    AccessCount,
    /// Texture coordinates unrolled from the first cell
    Texture,
}

/// The demo mesh, plus a context containing every demo field
struct Demo {
    mesh: GridMesh,
    ctx: Context,
}

impl Demo {
    fn new(settings: &MeshSettings) -> Result<Self> {
        let mut mesh = GridMesh::new(&settings.size)?;
        if let Some(axis) = settings.periodic {
            if axis >= settings.size.len() {
                bail!("periodic axis {axis} is out of range");
            }
            mesh = mesh.with_periodic(axis);
        }
        let warp = settings.warp;
        let coords = mesh.add_attribute_with(
            "coordinates",
            settings.size.len(),
            |p| {
                let mut out = p.to_vec();
                if out.len() > 1 {
                    out[0] += warp * p[0] * p[1];
                }
                out
            },
        );
        let size = settings.size.clone();
        let rgb = mesh.add_attribute_with("rgb", 3, |p| {
            let mut out: Vec<f64> = p
                .iter()
                .zip(&size)
                .map(|(p, n)| p / *n as f64)
                .collect();
            out.resize(3, 0.5);
            out
        });

        let dim = settings.size.len();
        let mut ctx = Context::new();
        ctx.finite_element("coordinates", &mesh, coords)?;
        ctx.xi_coordinates("xi", dim)?;
        let xyz = ctx.finite_element("xyz", &mesh, coords)?;
        ctx.set_coordinate_system(
            xyz,
            CoordinateSystem::new(CoordinateSystemType::CylindricalPolar),
        )?;
        ctx.coordinate_convert("polar", xyz)?;
        let rgb = ctx.finite_element("rgb", &mesh, rgb)?;
        ctx.color("hsl", ColorConversion::RgbToHsl, rgb)?;
        ctx.grayscale("gray", rgb, 1)?;
        ctx.cmiss_number("cmiss")?;
        ctx.access_count("access_count")?;
        let seed = first_cell(&mesh)?;
        ctx.texture_coordinates("texture", &mesh, seed)?;
        info!(
            "built {}-cell mesh with {} fields",
            mesh.cell_count(),
            ctx.len()
        );
        Ok(Self { mesh, ctx })
    }

    fn field(&self, choice: FieldChoice) -> Result<FieldId> {
        let name = match choice {
            FieldChoice::Coordinates => "coordinates",
            FieldChoice::Xi => "xi",
            FieldChoice::Polar => "polar",
            FieldChoice::Hsl => "hsl",
            FieldChoice::Gray => "gray",
            FieldChoice::Cmiss => "cmiss",
            FieldChoice::AccessCount => "access_count",
            FieldChoice::Texture => "texture",
        };
        self.ctx
            .lookup(name)
            .with_context(|| format!("no `{name}` field for this mesh"))
    }

    fn element(&self, index: &[usize]) -> Result<ElementId> {
        self.mesh
            .element(index)
            .with_context(|| format!("no element at {index:?}"))
    }
}

fn first_cell(mesh: &GridMesh) -> Result<ElementId> {
    let zero = vec![0; mesh.dimension()];
    mesh.element(&zero).context("mesh has no cells")
}

////////////////////////////////////////////////////////////////////////////////

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();

    let args = Args::parse();
    let now = Instant::now();
    let mut demo = Demo::new(&args.mesh)?;
    info!("Built mesh in {:?}", now.elapsed());

    match args.cmd {
        Command::Eval {
            field,
            node,
            element,
            xi,
            derivatives,
            n,
        } => {
            let id = demo.field(field)?;
            let loc = match (node, element, xi) {
                (Some(node), ..) => Location::Node(
                    demo.mesh
                        .node(&node)
                        .with_context(|| format!("no node at {node:?}"))?,
                ),
                (None, Some(element), Some(xi)) => {
                    Location::element(demo.element(&element)?, &xi)?
                }
                _ => bail!("either --node or --element and --xi is required"),
            };

            let start = Instant::now();
            let mut out = None;
            for _ in 0..n {
                // Clear the cache so that every pass does real work
                demo.ctx.invalidate(id)?;
                out = Some(demo.ctx.evaluate(&demo.mesh, id, &loc, derivatives)?);
            }
            info!(
                "Evaluated {n}x at {:?} µs/eval",
                start.elapsed().as_secs_f64() * 1e6 / n.max(1) as f64
            );
            if let Some(out) = out {
                info!("{field:?} = {:?}", out.values);
                if let Some(d) = out.derivatives {
                    info!("derivatives:{d}");
                }
            }
        }
        Command::FindXi {
            field,
            target,
            element,
            tolerance,
            nearest,
        } => {
            let id = demo.field(field)?;
            let scope = match element {
                Some(e) => SearchScope::Element(demo.element(&e)?),
                None => SearchScope::Mesh,
            };
            let settings = FindXiSettings {
                tolerance,
                find_nearest: nearest,
                ..Default::default()
            };
            let start = Instant::now();
            match demo
                .ctx
                .find_element_xi(&demo.mesh, id, &target, &scope, &settings)
            {
                Ok(found) => info!(
                    "found {target:?} in element {} at xi = {:?} ({:?})",
                    found.element,
                    found.xi.as_slice(),
                    start.elapsed()
                ),
                Err(femfield::Error::NotFound) => {
                    info!("{target:?} not found ({:?})", start.elapsed())
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Texture { seed } => {
            let id = demo.field(FieldChoice::Texture)?;
            if let Some(seed) = seed {
                let seed = demo.element(&seed)?;
                demo.ctx.build_texture_mapping(id, &demo.mesh, seed)?;
            }
            let mapping = demo.ctx.texture_mapping(id)?;
            info!(
                "texture mapping from element {} reaches {} of {} cells",
                mapping.seed(),
                mapping.len(),
                demo.mesh.cell_count()
            );
            for (e, entry) in mapping.iter() {
                let offset = &entry.offset[..mapping.dimension()];
                match demo.mesh.cell_index(e) {
                    Some(index) => {
                        info!("  {e} {:?}: {offset:?}", index.as_slice())
                    }
                    None => info!("  {e}: {offset:?}"),
                }
            }
            let unreached = demo
                .mesh
                .elements()
                .filter(|e| mapping.get(*e).is_none())
                .count();
            if unreached > 0 {
                info!("{unreached} element(s) were not reached");
            }
        }
    }
    Ok(())
}
