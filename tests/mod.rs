use nalgebra::*;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use nested::*;

const EPS : f64 = 1E-7;

/// Many checks run for every dimension from 1 to NMAX inclusive.
const NMAX : usize = 20;

fn close(a : f64, b : f64) -> bool {
    (a - b).abs() <= EPS * b.abs().max(1.)
}

fn random_matrix(n : usize, rng : &mut StdRng) -> DMatrix<f64> {
    DMatrix::from_iterator(n, n, (0..n*n).map(|_| rng.gen::<f64>() ))
}

/// Random ellipsoid centered at the origin. For any non-singular M, M^T M is positive-definite.
fn random_ellipsoid(n : usize, rng : &mut StdRng) -> Ellipsoid {
    loop {
        let m = random_matrix(n, rng);
        if m.determinant().abs() > 1e-10 {
            if let Ok(ell) = Ellipsoid::new(DVector::zeros(n), m.tr_mul(&m)) {
                return ell;
            }
        }
    }
}

fn sorted(v : &DVector<f64>) -> Vec<f64> {
    let mut s = v.as_slice().to_vec();
    s.sort_by(|a, b| a.partial_cmp(b).unwrap() );
    s
}

#[test]
fn ellipsoid_sphere() {
    let scale = 5.;
    for n in 1..=NMAX {
        let ctr = DVector::from_element(n, 2.0 * scale);
        let a = DMatrix::identity(n, n).unscale(scale.powi(2));
        let ell = Ellipsoid::new(ctr, a).unwrap();
        assert!(close(ell.volume(), vol_prefactor(n) * scale.powi(n as i32)));
        assert!(ell.axis_lengths().iter().all(|l| close(*l, scale) ));
        let gram = ell.axes() * ell.axes().transpose();
        assert!((gram - DMatrix::identity(n, n).scale(scale.powi(2))).norm() < EPS);
    }
}

#[test]
fn ellipsoid_vol_scaling() {
    let scale : f64 = 1.5;
    let mut rng = StdRng::seed_from_u64(0);
    for n in 1..=NMAX {
        let a = DMatrix::from_diagonal(&DVector::from_iterator(n, (0..n).map(|_| 0.1 + rng.gen::<f64>() )));
        let mut ell = Ellipsoid::new(DVector::zeros(n), a.clone()).unwrap();
        let ell2 = Ellipsoid::new(DVector::zeros(n), a.unscale(scale.powi(2))).unwrap();
        let vol = ell.volume();
        ell.scale_to_volume(vol * scale.powi(n as i32));

        assert!(close(ell.volume(), ell2.volume()));
        assert!((ell.matrix() - ell2.matrix()).norm() < EPS);
        let (l1, l2) = (sorted(ell.axis_lengths()), sorted(ell2.axis_lengths()));
        assert!(l1.iter().zip(l2.iter()).all(|(a, b)| close(*a, *b) ));
        let g1 = ell.axes() * ell.axes().transpose();
        let g2 = ell2.axes() * ell2.axes().transpose();
        assert!((&g1 - &g2).norm() < EPS * g2.norm().max(1.));
    }
}

#[test]
fn ellipsoid_contains() {
    let eps = 1.0e-7;
    let mut rng = StdRng::seed_from_u64(1);
    for n in 1..=NMAX {
        let ell = Ellipsoid::new(DVector::zeros(n), DMatrix::identity(n, n)).unwrap();
        let r = 1. / (n as f64).sqrt();
        assert!(!ell.contains(&DVector::from_element(n, r + eps)));
        assert!(ell.contains(&DVector::from_element(n, r - eps)));

        let diag = DVector::from_iterator(n, (0..n).map(|_| 0.1 + rng.gen::<f64>() ));
        let ell = Ellipsoid::new(DVector::zeros(n), DMatrix::from_diagonal(&diag)).unwrap();
        for i in 0..n {
            let axlen = 1. / diag[i].sqrt();
            let mut pt = DVector::zeros(n);
            pt[i] = axlen + eps;
            assert!(!ell.contains(&pt));
            pt[i] = axlen - eps;
            assert!(ell.contains(&pt));
        }
    }
}

#[test]
fn ellipsoid_sample_is_uniform() {
    let nsamples = 1000;
    let volfrac = 0.5;
    let mut rng = StdRng::seed_from_u64(2);
    for n in 1..=NMAX {
        let ell = random_ellipsoid(n, &mut rng);
        let mut inner = ell.clone();
        inner.scale_to_volume(volfrac * ell.volume());

        let expect = volfrac * nsamples as f64;
        let sigma = ((1. - volfrac) * volfrac * nsamples as f64).sqrt();
        let mut ninner = 0;
        for _ in 0..nsamples {
            let x = ell.sample(&mut rng);
            assert!(ell.contains(&x));
            if inner.contains(&x) {
                ninner += 1;
            }
        }
        assert!(expect - 10. * sigma < ninner as f64 && (ninner as f64) < expect + 10. * sigma);
    }
}

#[test]
fn bounding_ellipsoid_contains_points() {
    let npoints = 100;
    let mut rng = StdRng::seed_from_u64(3);
    for n in 1..=NMAX {
        let gen = random_ellipsoid(n, &mut rng);
        let x = gen.samples(npoints, &mut rng);
        let ell = bounding_ellipsoid(&x, 0.0).unwrap();
        assert!(x.iter().all(|xi| ell.contains(xi) ));

        let pointvol = gen.volume() / npoints as f64;
        let ell = bounding_ellipsoid(&x, pointvol).unwrap();
        assert!(x.iter().all(|xi| ell.contains(xi) ));
        assert!(ell.volume() >= gen.volume() * (1. - EPS));
    }
}

#[test]
fn bounding_ellipsoid_robust() {
    let mut rng = StdRng::seed_from_u64(4);
    for n in 1..=NMAX {
        let gen = random_ellipsoid(n, &mut rng);
        for npoints in 1..n {
            let x = gen.samples(npoints, &mut rng);
            let ell = bounding_ellipsoid(&x, gen.volume() / npoints as f64).unwrap();
            assert!((ell.volume() - gen.volume()).abs() <= EPS * gen.volume());
            assert!(x.iter().all(|xi| ell.contains(xi) ));
        }
    }
}

#[test]
fn multi_ellipsoid_bounds_clusters() {
    let mut rng = StdRng::seed_from_u64(5);
    for n in 2..=5 {
        let mut x = Vec::new();
        for k in 0..3 {
            let mut ctr = DVector::from_element(n, 0.2);
            if k > 0 {
                ctr[k-1] = 0.8;
            }
            let blob = Ellipsoid::sphere(ctr, 0.05).unwrap();
            x.extend(blob.samples(40, &mut rng));
        }
        let single = bounding_ellipsoid(&x, 0.0).unwrap();
        let multi = Decomposer::default().decompose(&x, 0.0).unwrap();
        assert!(x.iter().all(|xi| multi.contains(xi) ));
        assert!(multi.volume() <= single.volume());
        if HAVE_CLUSTERING {
            assert!(multi.len() >= 3);
        } else {
            assert_eq!(multi.len(), 1);
        }
    }
}
