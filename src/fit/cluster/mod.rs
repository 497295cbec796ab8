/// Centroid-based clustering implementation
pub mod center;

pub use center::*;

/// Types which can be thought of as living in a space and can have their distance compared.
/// The generic type parameter M designates a metric, usually a zero-sized type just used
/// to disambiguate between the metrics a type implements.
pub trait Distance<M>
where
    M : ?Sized
{

    fn distance(&self, other : &Self) -> f64;

}

pub trait Metric<T>
where
    T : Distance<Self> + ?Sized
{

    fn metric(a : &T, b : &T) -> f64;

}

pub struct Euclidian { }

impl<T> Metric<T> for Euclidian
where
    T : Distance<Self> + ?Sized
{

    fn metric(a : &T, b : &T) -> f64 {
        a.distance(b)
    }

}

impl Distance<Euclidian> for [f64] {

    fn distance(&self, other : &Self) -> f64 {
        assert!(self.len() == other.len());
        self.iter().zip(other.iter())
            .map(|(a, b)| (a - b).powf(2.) )
            .sum::<f64>()
            .sqrt()
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn euclidian() {
        let a = [0.0, 3.0];
        let b = [4.0, 0.0];
        assert_eq!(Euclidian::metric(&a[..], &b[..]), 5.0);
        assert_eq!(Euclidian::metric(&a[..], &a[..]), 0.0);
    }

}
