pub mod nifti;
