use crate::error::{Error, Result};
use crate::network::argmax;
use flate2::read::GzDecoder;
use ndarray::Array2;
use ndarray_rand::rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};
use tracing::info;

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

// A batch of data. Each row of xs is one datum, and the matching row of labels is its expected
// output (one-hot for classification).
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub xs: Array2<f64>,
    pub labels: Array2<f64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.xs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.nrows() == 0
    }

    // The class of every datum, i.e. the position of the 1.0 in each one-hot label.
    pub fn label_classes(&self) -> Vec<usize> {
        self.labels.rows().into_iter().map(argmax).collect()
    }
}

pub trait DataSource {
    fn input_size(&self) -> usize;
    fn output_size(&self) -> usize;
    fn next_train_batch(&mut self, batch_size: usize) -> Batch;
    fn next_test_batch(&mut self, batch_size: usize) -> Batch;
}

// Where to find an MNIST-style dataset. The files are the standard gzipped IDX files; Fashion
// MNIST uses the same names in its own directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MnistConfig {
    pub train_images: PathBuf,
    pub train_labels: PathBuf,
    pub test_images: PathBuf,
    pub test_labels: PathBuf,
    pub num_classes: usize,
    // Only keep these labels, renumbered by their position in the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_subset: Option<Vec<u8>>,
}

impl MnistConfig {
    pub fn in_dir(data_dir: &Path) -> MnistConfig {
        MnistConfig {
            train_images: data_dir.join("train-images-idx3-ubyte.gz"),
            train_labels: data_dir.join("train-labels-idx1-ubyte.gz"),
            test_images: data_dir.join("t10k-images-idx3-ubyte.gz"),
            test_labels: data_dir.join("t10k-labels-idx1-ubyte.gz"),
            num_classes: 10,
            label_subset: None,
        }
    }

    pub fn zero_one(data_dir: &Path) -> MnistConfig {
        MnistConfig {
            num_classes: 2,
            label_subset: Some(vec![0, 1]),
            ..MnistConfig::in_dir(data_dir)
        }
    }
}

// One half of the dataset (training or test) with its own shuffled reading order.
struct Split {
    images: Array2<f64>,
    labels: Vec<u8>,
    indices: Vec<usize>,
    cursor: usize,
}

impl Split {
    fn new<R: Rng + ?Sized>(images: Array2<f64>, labels: Vec<u8>, rng: &mut R) -> Split {
        let mut indices: Vec<usize> = (0..labels.len()).collect();
        indices.shuffle(rng);
        Split {
            images,
            labels,
            indices,
            cursor: 0,
        }
    }

    // The cursor moves before every read and wraps around, so the split is read endlessly in the
    // same shuffled order.
    fn next_index(&mut self) -> usize {
        self.cursor = (self.cursor + 1) % self.indices.len();
        self.indices[self.cursor]
    }

    fn next_batch(&mut self, batch_size: usize, num_classes: usize) -> Batch {
        let mut xs = Array2::zeros((batch_size, self.images.ncols()));
        let mut labels = Array2::zeros((batch_size, num_classes));

        for i in 0..batch_size {
            let index = self.next_index();
            xs.row_mut(i).assign(&self.images.row(index));
            labels[[i, usize::from(self.labels[index])]] = 1.0;
        }

        Batch { xs, labels }
    }
}

pub struct MnistData {
    num_classes: usize,
    train: Split,
    test: Split,
}

impl MnistData {
    pub fn load(config: &MnistConfig, seed: u64) -> Result<MnistData> {
        let train_images = parse_idx_images(&read_gz(&config.train_images)?)?;
        let train_labels = parse_idx_labels(&read_gz(&config.train_labels)?)?;
        let test_images = parse_idx_images(&read_gz(&config.test_images)?)?;
        let test_labels = parse_idx_labels(&read_gz(&config.test_labels)?)?;

        let (train_images, train_labels, test_images, test_labels) = match &config.label_subset {
            Some(subset) => {
                let (train_images, train_labels) =
                    keep_labels(&train_images, &train_labels, subset);
                let (test_images, test_labels) = keep_labels(&test_images, &test_labels, subset);
                (train_images, train_labels, test_images, test_labels)
            }
            None => (train_images, train_labels, test_images, test_labels),
        };

        info!(
            train = train_labels.len(),
            test = test_labels.len(),
            images = %config.train_images.display(),
            "loaded MNIST data"
        );
        MnistData::from_arrays(
            (train_images, train_labels),
            (test_images, test_labels),
            config.num_classes,
            &mut StdRng::seed_from_u64(seed),
        )
    }

    pub fn from_arrays<R: Rng + ?Sized>(
        train: (Array2<f64>, Vec<u8>),
        test: (Array2<f64>, Vec<u8>),
        num_classes: usize,
        rng: &mut R,
    ) -> Result<MnistData> {
        for (name, (images, labels)) in [("training", &train), ("test", &test)] {
            if labels.is_empty() {
                return Err(Error::InvalidDataset(format!("the {name} set is empty")));
            }
            if images.nrows() != labels.len() {
                return Err(Error::InvalidDataset(format!(
                    "the {name} set has {} images but {} labels",
                    images.nrows(),
                    labels.len()
                )));
            }
            if let Some(&label) = labels.iter().find(|&&label| usize::from(label) >= num_classes) {
                return Err(Error::InvalidDataset(format!(
                    "label {label} in the {name} set is out of range for {num_classes} classes"
                )));
            }
        }
        if train.0.ncols() != test.0.ncols() {
            return Err(Error::InvalidDataset(format!(
                "training images have {} pixels but test images have {}",
                train.0.ncols(),
                test.0.ncols()
            )));
        }

        Ok(MnistData {
            num_classes,
            train: Split::new(train.0, train.1, rng),
            test: Split::new(test.0, test.1, rng),
        })
    }

    pub fn train_len(&self) -> usize {
        self.train.labels.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.labels.len()
    }
}

impl DataSource for MnistData {
    fn input_size(&self) -> usize {
        self.train.images.ncols()
    }

    fn output_size(&self) -> usize {
        self.num_classes
    }

    fn next_train_batch(&mut self, batch_size: usize) -> Batch {
        self.train.next_batch(batch_size, self.num_classes)
    }

    fn next_test_batch(&mut self, batch_size: usize) -> Batch {
        self.test.next_batch(batch_size, self.num_classes)
    }
}

fn read_gz(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| {
        Error::InvalidDataset(format!("cannot open {}: {e}", path.display()))
    })?;
    let mut bytes = Vec::new();
    GzDecoder::new(file).read_to_end(&mut bytes)?;
    Ok(bytes)
}

// Reads the big-endian 32-bit header fields at the start of an IDX file.
fn read_header(bytes: &[u8], fields: usize) -> Result<Vec<u32>> {
    if bytes.len() < fields * 4 {
        return Err(Error::InvalidDataset(format!(
            "expected a {}-byte header, got {} bytes",
            fields * 4,
            bytes.len()
        )));
    }
    Ok(bytes[..fields * 4]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// Parses an IDX image file into an [images x (rows * columns)] matrix of values in [0, 1]. The
// header is four 32-bit integers: the magic number (2051), the number of images, the number of
// rows per image and the number of columns per image.
pub fn parse_idx_images(bytes: &[u8]) -> Result<Array2<f64>> {
    let header = read_header(bytes, 4)?;
    if header[0] != IMAGES_MAGIC {
        return Err(Error::InvalidDataset(format!(
            "bad image magic number {}, expected {IMAGES_MAGIC}",
            header[0]
        )));
    }
    let images = header[1] as usize;
    let too_large = || {
        Error::InvalidDataset(format!(
            "{} images of {}x{} pixels do not fit in memory",
            header[1], header[2], header[3]
        ))
    };
    let pixels_per_image = (header[2] as usize)
        .checked_mul(header[3] as usize)
        .ok_or_else(too_large)?;
    let expected_len = images.checked_mul(pixels_per_image).ok_or_else(too_large)?;

    let pixels = &bytes[16..];
    if pixels.len() != expected_len {
        return Err(Error::InvalidDataset(format!(
            "{images} images of {pixels_per_image} pixels need {expected_len} bytes, got {}",
            pixels.len()
        )));
    }

    Array2::from_shape_vec(
        (images, pixels_per_image),
        pixels.iter().map(|&value| f64::from(value) / 255.0).collect(),
    )
    .map_err(|e| Error::InvalidDataset(e.to_string()))
}

// Parses an IDX label file. The header is the magic number (2049) and the number of labels.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let header = read_header(bytes, 2)?;
    if header[0] != LABELS_MAGIC {
        return Err(Error::InvalidDataset(format!(
            "bad label magic number {}, expected {LABELS_MAGIC}",
            header[0]
        )));
    }
    let labels = &bytes[8..];
    if labels.len() != header[1] as usize {
        return Err(Error::InvalidDataset(format!(
            "expected {} labels, got {}",
            header[1],
            labels.len()
        )));
    }
    Ok(labels.to_vec())
}

// Keeps the images whose label is in `subset` and renumbers their labels by position in it.
fn keep_labels(images: &Array2<f64>, labels: &[u8], subset: &[u8]) -> (Array2<f64>, Vec<u8>) {
    let (rows, kept_labels): (Vec<usize>, Vec<u8>) = labels
        .iter()
        .enumerate()
        .filter_map(|(row, label)| {
            subset
                .iter()
                .position(|kept| kept == label)
                .map(|position| (row, position as u8))
        })
        .unzip();
    (images.select(ndarray::Axis(0), &rows), kept_labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use flate2::{Compression, write::GzEncoder};
    use ndarray::array;
    use std::collections::HashSet;
    use std::io::Write;
    use tempfile::tempdir;

    fn idx_images(images: u32, rows: u32, columns: u32, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [IMAGES_MAGIC, images, rows, columns] {
            bytes.extend(field.to_be_bytes());
        }
        bytes.extend(pixels);
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(LABELS_MAGIC.to_be_bytes());
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend(labels);
        bytes
    }

    #[test]
    fn parses_idx_images_and_labels() {
        let images = parse_idx_images(&idx_images(2, 1, 2, &[0, 255, 51, 102])).unwrap();
        assert_eq!(images.dim(), (2, 2));
        assert_relative_eq!(images[[0, 1]], 1.0);
        assert_relative_eq!(images[[1, 0]], 0.2);

        assert_eq!(parse_idx_labels(&idx_labels(&[3, 7])).unwrap(), vec![3, 7]);
    }

    #[test]
    fn rejects_malformed_idx_files() {
        let mut wrong_magic = idx_images(1, 1, 1, &[0]);
        wrong_magic[3] = 0;
        assert!(matches!(parse_idx_images(&wrong_magic), Err(Error::InvalidDataset(_))));
        assert!(parse_idx_images(&idx_images(2, 1, 1, &[0])).is_err());
        assert!(parse_idx_images(&[0, 0]).is_err());

        let mut short = idx_labels(&[1, 2, 3]);
        short.pop();
        assert!(parse_idx_labels(&short).is_err());
        assert!(parse_idx_labels(&idx_images(1, 1, 1, &[0])).is_err());
    }

    #[test]
    fn oversized_headers_are_rejected() {
        let huge = idx_images(u32::MAX, u32::MAX, u32::MAX, &[0; 4]);
        assert!(matches!(parse_idx_images(&huge), Err(Error::InvalidDataset(_))));
    }

    #[test]
    fn loads_gzipped_files_with_a_label_subset() {
        let dir = tempdir().unwrap();
        let write_gz = |name: &str, bytes: &[u8]| {
            let mut encoder = GzEncoder::new(File::create(dir.path().join(name)).unwrap(), Compression::fast());
            encoder.write_all(bytes).unwrap();
            encoder.finish().unwrap();
        };
        write_gz("train-images-idx3-ubyte.gz", &idx_images(4, 1, 1, &[10, 20, 30, 40]));
        write_gz("train-labels-idx1-ubyte.gz", &idx_labels(&[0, 5, 1, 1]));
        write_gz("t10k-images-idx3-ubyte.gz", &idx_images(2, 1, 1, &[50, 60]));
        write_gz("t10k-labels-idx1-ubyte.gz", &idx_labels(&[1, 9]));

        let mut data = MnistData::load(&MnistConfig::zero_one(dir.path()), 7).unwrap();

        assert_eq!(data.train_len(), 3);
        assert_eq!(data.test_len(), 1);
        assert_eq!(data.input_size(), 1);
        assert_eq!(data.output_size(), 2);

        let test = data.next_test_batch(2);
        assert_eq!(test.label_classes(), vec![1, 1]);
        assert_relative_eq!(test.xs[[0, 0]], 50.0 / 255.0);
    }

    #[test]
    fn missing_files_are_reported() {
        let config = MnistConfig::in_dir(Path::new("/nonexistent/neuron-view"));
        assert!(matches!(MnistData::load(&config, 0), Err(Error::InvalidDataset(_))));
    }

    fn tiny_data(len: usize) -> MnistData {
        let images = Array2::from_shape_fn((len, 1), |(i, _)| i as f64);
        let labels = (0..len).map(|i| (i % 3) as u8).collect();
        MnistData::from_arrays(
            (images.clone(), labels),
            (images, vec![0; len]),
            3,
            &mut StdRng::seed_from_u64(11),
        )
        .unwrap()
    }

    #[test]
    fn batches_visit_every_datum_once_per_pass() {
        let mut data = tiny_data(10);

        let first_pass = data.next_train_batch(10);
        let seen: HashSet<u64> = first_pass.xs.iter().map(|&x| x as u64).collect();
        assert_eq!(seen.len(), 10);

        // Labels stay attached to their images.
        for (x, class) in first_pass.xs.column(0).iter().zip(first_pass.label_classes()) {
            assert_eq!(*x as usize % 3, class);
        }

        // The next pass repeats the same shuffled order.
        let second_pass = data.next_train_batch(10);
        assert_eq!(first_pass, second_pass);

        let wrapped = data.next_train_batch(25);
        assert_eq!(wrapped.len(), 25);
        assert_eq!(wrapped.labels.sum(), 25.0);
    }

    #[test]
    fn inconsistent_arrays_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let images = array![[0.0], [1.0]];
        assert!(MnistData::from_arrays(
            (images.clone(), vec![0]),
            (images.clone(), vec![0, 1]),
            2,
            &mut rng
        )
        .is_err());
        assert!(MnistData::from_arrays(
            (images.clone(), vec![0, 2]),
            (images.clone(), vec![0, 1]),
            2,
            &mut rng
        )
        .is_err());
        assert!(MnistData::from_arrays(
            (Array2::zeros((0, 1)), vec![]),
            (images, vec![0, 1]),
            2,
            &mut rng
        )
        .is_err());
    }
}
