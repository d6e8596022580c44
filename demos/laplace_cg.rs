//! Solves a Laplace problem with Dirichlet boundary conditions on a distorted unit cube with the
//! matrix-free operator and CG, and reports device memory usage if monitoring is available.
//! For Q2 the solve is repeated with a two-level p-multigrid preconditioner.
//!
//! Usage: `cargo run --release --example laplace_cg -- [cells per dim] [degree]`
use eyre::eyre;
use fenris_matfree::assembly::assemble_stiffness_csr;
use fenris_matfree::cg::{ConjugateGradient, DirichletOperator, RelativeResidualCriterion};
use fenris_matfree::multigrid::{
    assemble_q1_to_q2_prolongation, dirichlet_diagonal, estimate_largest_eigenvalue, ChebyshevSmoother,
    JacobiPreconditioner, TwoLevelMultigrid,
};
use fenris_matfree::operator::MatFreeLaplace;
use fenris_matfree::procedural::create_unit_box_hex_mesh;
use fenris_matfree::telemetry::{SysfsMonitor, Telemetry};
use nalgebra::DVector;
use std::time::Instant;

fn parse_arg(args: &[String], index: usize, default: usize) -> eyre::Result<usize> {
    args.get(index)
        .map_or(Ok(default), |arg| arg.parse())
        .map_err(|err| eyre!("Invalid argument {}: {}", index, err))
}

fn main() -> eyre::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cells_per_dim = parse_arg(&args, 1, 16)?;
    let degree = parse_arg(&args, 2, 2)?;

    let telemetry = Telemetry::initialize_or_disabled(SysfsMonitor::default(), 0);

    let mut mesh = create_unit_box_hex_mesh::<f64>(cells_per_dim, degree)?;
    mesh.perturb_interior_vertices(0.1);
    let constants = [1.0];
    let view = mesh.view(&constants);
    let laplace = MatFreeLaplace::from_view(degree, &view)?;
    println!(
        "Q{} mesh with {} cells and {} dofs",
        degree,
        mesh.num_cells(),
        mesh.num_dofs()
    );

    let dirichlet = DirichletOperator::new(&laplace, mesh.boundary_dofs());
    let mut g = vec![0.0; mesh.num_dofs()];
    let points = mesh.dof_coordinates();
    for &dof in dirichlet.dofs() {
        let p = points[dof];
        g[dof] = (p.x * p.y).exp() + p.z * p.z;
    }

    let mut b = DVector::zeros(mesh.num_dofs());
    laplace.apply(&g, b.as_mut_slice())?;
    b.neg_mut();
    dirichlet.zero_masked(b.as_mut_slice());

    telemetry.memory_used_report("before solve").iter().for_each(|line| println!("{}", line));

    let mut u = DVector::zeros(mesh.num_dofs());
    let start = Instant::now();
    let output = ConjugateGradient::new()
        .with_operator(&dirichlet)
        .with_stopping_criterion(RelativeResidualCriterion::new(1e-10))
        .solve_with_guess(&b, &mut u)
        .map_err(|err| eyre!("{}", err))?;
    let elapsed = start.elapsed();

    println!("CG converged in {} iterations ({:.3?})", output.num_iterations, elapsed);
    if let Some((min, max)) = output.estimate_extreme_eigenvalues() {
        println!("Estimated condition number: {:.3e}", max / min);
    }

    if degree == 2 {
        let mut coarse = create_unit_box_hex_mesh::<f64>(cells_per_dim, 1)?;
        coarse.perturb_interior_vertices(0.1);
        let coarse_view = coarse.view(&constants);

        let diagonal = dirichlet_diagonal(&laplace, dirichlet.dofs(), mesh.num_dofs())?;
        let jacobi = JacobiPreconditioner::from_diagonal(&diagonal)?;
        let lambda_max = estimate_largest_eigenvalue(&dirichlet, &jacobi, mesh.num_dofs(), 20)?;
        let smoother = ChebyshevSmoother::from_largest_eigenvalue(&dirichlet, &jacobi, lambda_max, 4)?;
        let multigrid = TwoLevelMultigrid::new(
            smoother,
            assemble_q1_to_q2_prolongation(&coarse_view, &view)?,
            assemble_stiffness_csr(&coarse_view, 1)?,
            coarse.boundary_dofs(),
        )?;

        let mut u_mg = DVector::zeros(mesh.num_dofs());
        let start = Instant::now();
        let output = ConjugateGradient::new()
            .with_operator(&dirichlet)
            .with_preconditioner(&multigrid)
            .with_stopping_criterion(RelativeResidualCriterion::new(1e-10))
            .solve_with_guess(&b, &mut u_mg)
            .map_err(|err| eyre!("{}", err))?;
        println!(
            "p-multigrid preconditioned CG converged in {} iterations ({:.3?}), max difference {:.3e}",
            output.num_iterations,
            start.elapsed(),
            (&u_mg - &u).amax()
        );
    }

    telemetry
        .memory_percentage_used_report("after solve")
        .iter()
        .for_each(|line| println!("{}", line));
    Ok(())
}
