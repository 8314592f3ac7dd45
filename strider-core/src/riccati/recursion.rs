//! Event-aware backward and forward Riccati sweeps.
//!
//! The backward sweep runs serially from the terminal stage to the initial
//! stage, detouring through the aux/impulse (or lift) stages of every event
//! interval. The stage before an impulse carries the switching constraint
//! and is factorized by the constrained kernel; STO-enabled events
//! additionally produce a switching-time policy from the Hamiltonian jump.
//! The forward sweep propagates the state direction through the same chain,
//! substituting the impulse map at events.

use crate::hybrid::{sto, TimeDiscretization};
use crate::kkt::{Direction, HybridArray, KktMatrix, KktResidual};
use crate::ocp::SwitchingConstraint;
use crate::robot::RobotModel;

use super::factorization::{RiccatiFactorization, SwitchingRiccatiFactorization};
use super::factorizer::{RegularizationPolicy, RiccatiError, RiccatiFactorizer};
use super::lqr_policy::{LqrPolicy, StoPolicy};

/// Backward/forward Riccati recursion over the event-aware grid.
pub struct RiccatiRecursion {
    factorizer: RiccatiFactorizer,
    policies: HybridArray<LqrPolicy>,
    sto_impulse: Vec<StoPolicy>,
    sto_lift: Vec<StoPolicy>,
    switching: Vec<SwitchingRiccatiFactorization>,
    sto_reg: f64,
    n: usize,
}

impl RiccatiRecursion {
    pub fn new(
        robot: &dyn RobotModel,
        n: usize,
        max_events: usize,
        reg: RegularizationPolicy,
        sto_reg: f64,
    ) -> Self {
        assert!(sto_reg > 0.0, "switching-time regularization must be positive");
        Self {
            factorizer: RiccatiFactorizer::new(robot.dimv(), robot.dimu(), reg),
            policies: HybridArray::generate(n, max_events, || LqrPolicy::new(robot)),
            sto_impulse: (0..max_events).map(|_| StoPolicy::new(robot)).collect(),
            sto_lift: (0..max_events).map(|_| StoPolicy::new(robot)).collect(),
            switching: (0..max_events)
                .map(|_| SwitchingRiccatiFactorization::new(robot))
                .collect(),
            sto_reg,
            n,
        }
    }

    /// Total diagonal shifts applied to control Hessians so far.
    pub fn regularization_bumps(&self) -> u64 {
        self.factorizer.reg_bumps
    }

    /// Backward sweep. `switching_constraints[imp]` is the condensed
    /// switching constraint of the stage before impulse `imp`.
    pub fn backward(
        &mut self,
        discretization: &TimeDiscretization,
        kkt_matrix: &KktMatrix,
        kkt_residual: &KktResidual,
        switching_constraints: &[&SwitchingConstraint],
        factorization: &mut RiccatiFactorization,
    ) -> Result<(), RiccatiError> {
        let n = self.n;
        self.factorizer.backward_terminal(
            &kkt_matrix[n],
            &kkt_residual[n],
            &mut factorization[n],
        );
        for i in (0..n).rev() {
            if let Some(imp) = discretization.impulse_index_after(i) {
                // grid[i+1] <- aux <- impulse <- grid[i] (constrained).
                self.factorizer.backward_stage(
                    &kkt_matrix.aux[imp],
                    &kkt_residual.aux[imp],
                    &factorization.grid[i + 1],
                    &mut factorization.aux[imp],
                    &mut self.policies.aux[imp],
                )?;
                self.factorizer.backward_impulse(
                    &kkt_matrix.impulse[imp],
                    &kkt_residual.impulse[imp],
                    &factorization.aux[imp],
                    &mut factorization.impulse[imp],
                );
                {
                    let sw = switching_constraints[imp];
                    self.factorizer.backward_stage_constrained(
                        &kkt_matrix[i],
                        &kkt_residual[i],
                        sw.gx(),
                        sw.gu(),
                        sw.residual_condensed(),
                        &factorization.impulse[imp],
                        &mut factorization.grid[i],
                        &mut self.policies.grid[i],
                        &mut self.switching[imp],
                    )?;
                }
                if discretization.is_sto_enabled_impulse(imp) {
                    let policy = &mut self.sto_impulse[imp];
                    policy.h_res =
                        sto::impulse_hamiltonian_jump(discretization, kkt_residual, imp);
                    policy.hx.copy_from(&kkt_residual[i].hx);
                    policy.hx -= &kkt_residual.aux[imp].hx;
                    policy.qtt_inv = 1.0 / self.sto_reg;
                }
            } else if let Some(l) = discretization.lift_index_after(i) {
                self.factorizer.backward_stage(
                    &kkt_matrix.lift[l],
                    &kkt_residual.lift[l],
                    &factorization.grid[i + 1],
                    &mut factorization.lift[l],
                    &mut self.policies.lift[l],
                )?;
                self.factorizer.backward_stage(
                    &kkt_matrix[i],
                    &kkt_residual[i],
                    &factorization.lift[l],
                    &mut factorization.grid[i],
                    &mut self.policies.grid[i],
                )?;
                if discretization.is_sto_enabled_lift(l) {
                    let policy = &mut self.sto_lift[l];
                    policy.h_res = sto::lift_hamiltonian_jump(discretization, kkt_residual, l);
                    policy.hx.copy_from(&kkt_residual[i].hx);
                    policy.hx -= &kkt_residual.lift[l].hx;
                    policy.qtt_inv = 1.0 / self.sto_reg;
                }
            } else {
                let (head, tail) = factorization.grid.split_at_mut(i + 1);
                self.factorizer.backward_stage(
                    &kkt_matrix[i],
                    &kkt_residual[i],
                    &tail[0],
                    &mut head[i],
                    &mut self.policies.grid[i],
                )?;
            }
        }
        Ok(())
    }

    /// Forward sweep. `d.grid[0].dx` must hold the initial-state mismatch.
    pub fn forward(
        &self,
        discretization: &TimeDiscretization,
        kkt_matrix: &KktMatrix,
        kkt_residual: &KktResidual,
        d: &mut Direction,
    ) {
        let n = self.n;
        for i in 0..n {
            if let Some(imp) = discretization.impulse_index_after(i) {
                let sto = discretization.is_sto_enabled_impulse(imp);
                let dts = if sto {
                    self.sto_impulse[imp].dts(&d.grid[i].dx)
                } else {
                    0.0
                };
                {
                    let (left, _) = d.grid.split_at_mut(i + 1);
                    let di = &mut left[i];
                    di.dts = dts;
                    let dn = &mut d.impulse[imp];
                    dn.dts = dts;
                    self.factorizer.forward_stage(
                        &kkt_matrix[i],
                        &kkt_residual[i],
                        &self.policies[i],
                        di,
                        dn,
                        dts,
                        if sto { 1.0 } else { 0.0 },
                    );
                }
                {
                    let dn = &mut d.aux[imp];
                    dn.dts = dts;
                    self.factorizer.forward_impulse(
                        &kkt_matrix.impulse[imp],
                        &kkt_residual.impulse[imp],
                        &d.impulse[imp],
                        dn,
                    );
                }
                {
                    let (aux, grid) = (&mut d.aux, &mut d.grid);
                    self.factorizer.forward_stage(
                        &kkt_matrix.aux[imp],
                        &kkt_residual.aux[imp],
                        &self.policies.aux[imp],
                        &mut aux[imp],
                        &mut grid[i + 1],
                        dts,
                        if sto { -1.0 } else { 0.0 },
                    );
                }
            } else if let Some(l) = discretization.lift_index_after(i) {
                let sto = discretization.is_sto_enabled_lift(l);
                let dts = if sto {
                    self.sto_lift[l].dts(&d.grid[i].dx)
                } else {
                    0.0
                };
                {
                    let (left, _) = d.grid.split_at_mut(i + 1);
                    let di = &mut left[i];
                    di.dts = dts;
                    let dn = &mut d.lift[l];
                    dn.dts = dts;
                    self.factorizer.forward_stage(
                        &kkt_matrix[i],
                        &kkt_residual[i],
                        &self.policies[i],
                        di,
                        dn,
                        dts,
                        if sto { 1.0 } else { 0.0 },
                    );
                }
                {
                    let (lift, grid) = (&mut d.lift, &mut d.grid);
                    self.factorizer.forward_stage(
                        &kkt_matrix.lift[l],
                        &kkt_residual.lift[l],
                        &self.policies.lift[l],
                        &mut lift[l],
                        &mut grid[i + 1],
                        dts,
                        if sto { -1.0 } else { 0.0 },
                    );
                }
            } else {
                let (left, right) = d.grid.split_at_mut(i + 1);
                self.factorizer.forward_stage(
                    &kkt_matrix[i],
                    &kkt_residual[i],
                    &self.policies[i],
                    &mut left[i],
                    &mut right[0],
                    0.0,
                    0.0,
                );
            }
        }
    }

    /// Feedback policy of grid stage `i`.
    pub fn policy(&self, i: usize) -> &LqrPolicy {
        &self.policies[i]
    }

    /// Switching-multiplier factorization of impulse `imp`.
    pub fn switching_factorization(&self, imp: usize) -> &SwitchingRiccatiFactorization {
        &self.switching[imp]
    }

    /// State-feedback gain `(Kq, Kv)` of grid stage `i`.
    pub fn state_feedback_gain(
        &self,
        i: usize,
    ) -> (nalgebra::DMatrix<f64>, nalgebra::DMatrix<f64>) {
        let policy = &self.policies[i];
        (policy.kq().clone_owned(), policy.kv().clone_owned())
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{DMatrix, DVector};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::hybrid::ContactSequence;
    use crate::kkt::{Direction, KktMatrix, KktResidual};
    use crate::robot::{ContactStatus, LinearChainModel};

    use super::*;

    fn random_vec(rng: &mut StdRng, n: usize) -> DVector<f64> {
        DVector::from_fn(n, |_, _| rng.gen_range(-1.0..1.0))
    }

    fn random_mat(rng: &mut StdRng, r: usize, c: usize) -> DMatrix<f64> {
        DMatrix::from_fn(r, c, |_, _| rng.gen_range(-1.0..1.0))
    }

    fn random_spd(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
        let a = random_mat(rng, n, n);
        &a * a.transpose() + DMatrix::identity(n, n)
    }

    /// On a random convex quadratic stage chain without constraints, the
    /// Riccati-computed direction equals the solution of the global banded
    /// KKT system solved densely.
    #[test]
    fn test_riccati_matches_dense_kkt_solve() {
        let robot = LinearChainModel::new(2);
        let n = 3;
        let dimx = 4;
        let dimu = 2;
        let mut rng = StdRng::seed_from_u64(4242);

        let seq = ContactSequence::new(ContactStatus::new(0), 0);
        let mut disc = TimeDiscretization::new(1.0, n, 0);
        disc.discretize(&seq, 0.0);
        assert!(disc.is_formulation_tractable());

        let mut km = KktMatrix::new(&robot, n, 0);
        let mut kr = KktResidual::new(&robot, n, 0);
        for i in 0..n {
            km[i].fxx = random_mat(&mut rng, dimx, dimx);
            km[i].fvu = random_mat(&mut rng, dimx / 2, dimu);
            km[i].qxx = random_spd(&mut rng, dimx);
            km[i].qxu = 0.1 * random_mat(&mut rng, dimx, dimu);
            km[i].quu = random_spd(&mut rng, dimu);
            kr[i].lx = random_vec(&mut rng, dimx);
            kr[i].lu = random_vec(&mut rng, dimu);
            kr[i].fx = random_vec(&mut rng, dimx);
        }
        km[n].qxx = random_spd(&mut rng, dimx);
        kr[n].lx = random_vec(&mut rng, dimx);

        let mut recursion = RiccatiRecursion::new(
            &robot,
            n,
            0,
            crate::riccati::RegularizationPolicy::default(),
            10.0,
        );
        let mut fact = RiccatiFactorization::new(&robot, n, 0);
        recursion
            .backward(&disc, &km, &kr, &[], &mut fact)
            .unwrap();

        let dx0 = random_vec(&mut rng, dimx);
        let mut d = Direction::new(&robot, n, 0);
        d.grid[0].dx.copy_from(&dx0);
        recursion.forward(&disc, &km, &kr, &mut d);

        // Dense KKT: z = (dx_0..dx_n, du_0..du_{n-1}), equality rows for the
        // initial state and the dynamics.
        let nz = (n + 1) * dimx + n * dimu;
        let nc = (n + 1) * dimx;
        let x_off = |i: usize| i * dimx;
        let u_off = |i: usize| (n + 1) * dimx + i * dimu;

        let mut h = DMatrix::<f64>::zeros(nz, nz);
        let mut g = DVector::<f64>::zeros(nz);
        for i in 0..n {
            h.view_mut((x_off(i), x_off(i)), (dimx, dimx))
                .copy_from(&km[i].qxx);
            h.view_mut((x_off(i), u_off(i)), (dimx, dimu))
                .copy_from(&km[i].qxu);
            h.view_mut((u_off(i), x_off(i)), (dimu, dimx))
                .copy_from(&km[i].qxu.transpose());
            h.view_mut((u_off(i), u_off(i)), (dimu, dimu))
                .copy_from(&km[i].quu);
            g.rows_mut(x_off(i), dimx).copy_from(&kr[i].lx);
            g.rows_mut(u_off(i), dimu).copy_from(&kr[i].lu);
        }
        h.view_mut((x_off(n), x_off(n)), (dimx, dimx))
            .copy_from(&km[n].qxx);
        g.rows_mut(x_off(n), dimx).copy_from(&kr[n].lx);

        let mut c = DMatrix::<f64>::zeros(nc, nz);
        let mut b = DVector::<f64>::zeros(nc);
        // dx_0 = dx0.
        c.view_mut((0, 0), (dimx, dimx))
            .copy_from(&DMatrix::identity(dimx, dimx));
        b.rows_mut(0, dimx).copy_from(&dx0);
        // dx_{i+1} − A dx_i − B du_i = e_i.
        for i in 0..n {
            let row = (i + 1) * dimx;
            let mut bmat = DMatrix::zeros(dimx, dimu);
            bmat.view_mut((dimx / 2, 0), (dimx / 2, dimu))
                .copy_from(&km[i].fvu);
            c.view_mut((row, x_off(i)), (dimx, dimx))
                .copy_from(&(-&km[i].fxx));
            c.view_mut((row, u_off(i)), (dimx, dimu)).copy_from(&(-bmat));
            c.view_mut((row, x_off(i + 1)), (dimx, dimx))
                .copy_from(&DMatrix::identity(dimx, dimx));
            b.rows_mut(row, dimx).copy_from(&kr[i].fx);
        }

        let dim = nz + nc;
        let mut kkt = DMatrix::<f64>::zeros(dim, dim);
        kkt.view_mut((0, 0), (nz, nz)).copy_from(&h);
        kkt.view_mut((0, nz), (nz, nc)).copy_from(&c.transpose());
        kkt.view_mut((nz, 0), (nc, nz)).copy_from(&c);
        let mut rhs = DVector::<f64>::zeros(dim);
        rhs.rows_mut(0, nz).copy_from(&(-&g));
        rhs.rows_mut(nz, nc).copy_from(&b);
        let z = kkt.lu().solve(&rhs).expect("dense KKT solve failed");

        for i in 0..=n {
            let dense_dx = z.rows(x_off(i), dimx).clone_owned();
            let err = (&dense_dx - &d.grid[i].dx).amax();
            assert!(err < 1e-8, "dx mismatch at stage {}: {}", i, err);
        }
        for i in 0..n {
            let dense_du = z.rows(u_off(i), dimu).clone_owned();
            let err = (&dense_du - &d.grid[i].du).amax();
            assert!(err < 1e-8, "du mismatch at stage {}: {}", i, err);
        }

        // Costate identity: dλ = P dx − s reproduces the dense stationarity
        // with respect to the state at every stage.
        for i in 0..=n {
            RiccatiFactorizer::compute_costate_direction(&fact.grid[i], &mut d.grid[i]);
        }
        for i in 0..n {
            let mut res = kr[i].lx.clone();
            res.gemv(1.0, &km[i].qxx, &d.grid[i].dx, 1.0);
            res.gemv(1.0, &km[i].qxu, &d.grid[i].du, 1.0);
            res.gemv_tr(1.0, &km[i].fxx, &d.grid[i + 1].dlmdgmm, 1.0);
            res -= &d.grid[i].dlmdgmm;
            assert!(
                res.amax() < 1e-8,
                "costate stationarity violated at stage {}: {}",
                i,
                res.amax()
            );
        }
    }
}
